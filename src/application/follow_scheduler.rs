//! Single-flight overlay follow with trailing coalescing.
//!
//! The scheduler owns no futures. The session asks it whether a follow to a
//! time may start now, runs the fetch, and reports completion; the scheduler
//! answers with the next pass to run, if any. This keeps at most one overlay
//! fetch in flight per session while the latest requested time is always
//! served eventually.

/// Answer to a follow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDecision {
    /// No fetch in flight: start one for this time.
    Start(i64),
    /// A fetch is in flight; the time was folded into the pending target.
    Coalesced,
}

/// What to do after a fetch completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowNext {
    Run(i64),
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayFollowScheduler {
    in_flight: Option<i64>,
    pending: Option<i64>,
    consistency_pass_used: bool,
    issued: u64,
}

impl OverlayFollowScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, target: i64) -> FollowDecision {
        if self.in_flight.is_some() {
            self.pending = Some(self.pending.map_or(target, |p| p.max(target)));
            return FollowDecision::Coalesced;
        }
        self.in_flight = Some(target);
        self.consistency_pass_used = false;
        self.issued += 1;
        FollowDecision::Start(target)
    }

    /// Report completion (success or failure) of the in-flight fetch.
    ///
    /// A pending target is taken first. Otherwise, when the rendered factor
    /// time still differs from the target, one consistency pass is issued per
    /// chain so a failing endpoint cannot loop forever.
    pub fn complete(&mut self, rendered_factor_time: Option<i64>) -> FollowNext {
        let Some(target) = self.in_flight.take() else {
            return FollowNext::Idle;
        };

        if let Some(next) = self.pending.take() {
            self.in_flight = Some(next);
            self.issued += 1;
            return FollowNext::Run(next);
        }

        if rendered_factor_time != Some(target) && !self.consistency_pass_used {
            self.consistency_pass_used = true;
            self.in_flight = Some(target);
            self.issued += 1;
            return FollowNext::Run(target);
        }

        self.consistency_pass_used = false;
        FollowNext::Idle
    }

    pub fn reset(&mut self) {
        self.in_flight = None;
        self.pending = None;
        self.consistency_pass_used = false;
    }

    pub fn in_flight(&self) -> Option<i64> {
        self.in_flight
    }

    pub fn pending(&self) -> Option<i64> {
        self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Fetches issued since creation.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

/// Debounce for the passive "follow the tip" path.
///
/// Each `arm` supersedes the previous one; only the latest generation fires.
#[derive(Debug, Clone, Default)]
pub struct TipDebouncer {
    generation: u64,
    armed: bool,
}

impl TipDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self) -> u64 {
        self.generation += 1;
        self.armed = true;
        self.generation
    }

    /// True when `generation` is the live arm; consumes it.
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.armed && generation == self.generation {
            self.armed = false;
            return true;
        }
        false
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
