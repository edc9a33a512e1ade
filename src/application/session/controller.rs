use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::{join, select_biased};
use std::rc::Rc;
use std::time::Duration;

use super::context::{LoadPhase, LoadStatus, SessionContext, SessionToken};
use super::observer::ChartObserver;
use crate::application::config::{ChartConfig, FollowSource, LiveConfig};
use crate::application::follow_scheduler::{FollowDecision, FollowNext, OverlayFollowScheduler, TipDebouncer};
use crate::domain::errors::{ChartError, ChartResult};
use crate::domain::events::PushMessage;
use crate::domain::factor::FactorSlices;
use crate::domain::logging::LogComponent;
use crate::domain::market_data::{FetchSummary, Readiness, SeriesId, Timeframe, assess_readiness, backoff_delay_ms};
use crate::domain::overlay::{Cursor, OverlayDelta};
use crate::domain::repositories::{
    CandlesQuery, ChartDataSource, DeltaPollQuery, DeltaPollResponse, FactorQuery, LiveFrame, LiveFrameQuery,
    OverlayDeltaQuery, PushChannel, PushStream, Timer,
};
use crate::{log_debug, log_error, log_info, log_warn};

const COMPONENT: LogComponent = LogComponent::Application("LiveSession");

/// Collaborators of a live session.
pub struct SessionPorts<S, P> {
    pub source: Rc<S>,
    pub push: Rc<P>,
    pub timer: Rc<dyn Timer>,
    pub observer: Rc<dyn ChartObserver>,
}

impl<S, P> Clone for SessionPorts<S, P> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            push: Rc::clone(&self.push),
            timer: Rc::clone(&self.timer),
            observer: Rc::clone(&self.observer),
        }
    }
}

/// Background work completed inside the event loop.
enum Work {
    Followed { target: i64, result: FollowResult },
    TipDebounce(u64),
}

enum FollowResult {
    Slices { delta: ChartResult<OverlayDelta>, factors: ChartResult<FactorSlices> },
    Poll(ChartResult<DeltaPollResponse>),
}

type WorkQueue = FuturesUnordered<LocalBoxFuture<'static, Work>>;

enum Step {
    Work(Work),
    Push(Option<ChartResult<PushMessage>>),
}

enum BackfillOutcome {
    Seeded,
    Empty,
}

/// One live series session: backfill, baseline overlays, push routing and
/// overlay follow.
///
/// `run` consumes the controller. Dropping its future (for instance through
/// an `AbortHandle`) releases every in-flight request and timer; cancelling
/// the token stops all observer updates at the next suspension point.
pub struct LiveSessionController<S, P> {
    ports: SessionPorts<S, P>,
    config: LiveConfig,
    ctx: SessionContext,
    scheduler: OverlayFollowScheduler,
    debouncer: TipDebouncer,
    token: SessionToken,
}

impl<S, P> LiveSessionController<S, P>
where
    S: ChartDataSource + 'static,
    P: PushChannel,
{
    pub fn new(series_id: SeriesId, timeframe: Timeframe, config: &ChartConfig, ports: SessionPorts<S, P>) -> Self {
        let ctx = SessionContext::new(
            series_id,
            timeframe,
            config.live.window_candles,
            config.render.visibility_flags(),
            config.render.pen_segment_cap,
        );
        Self {
            ports,
            config: config.live.clone(),
            ctx,
            scheduler: OverlayFollowScheduler::new(),
            debouncer: TipDebouncer::new(),
            token: SessionToken::new(),
        }
    }

    /// Handle checked after every await; cancel it to stop the session.
    pub fn token(&self) -> SessionToken {
        self.token.clone()
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Drive the session until it is cancelled, found empty, or fails terminally.
    pub async fn run(mut self) -> ChartResult<LoadPhase> {
        log_info!(COMPONENT, "Starting session for {} ({})", self.ctx.series_id, self.ctx.timeframe);
        let result = self.drive().await;
        if let Err(ChartError::Cancelled) = result {
            log_info!(COMPONENT, "Session for {} stopped", self.ctx.series_id);
        }
        self.teardown();
        result
    }

    /// Idempotent; after this no observer update is emitted.
    pub fn teardown(&mut self) {
        self.token.cancel();
        self.scheduler.reset();
        self.debouncer.cancel();
    }

    async fn drive(&mut self) -> ChartResult<LoadPhase> {
        self.set_status(LoadStatus::new(LoadPhase::Loading));

        if let BackfillOutcome::Empty = self.backfill().await? {
            self.set_status(LoadStatus::new(LoadPhase::Empty).with_message("no candles for this series"));
            return Ok(LoadPhase::Empty);
        }

        self.load_baseline().await?;
        let mut ready = LoadStatus::new(LoadPhase::Ready);
        ready.last_bar_time = self.ctx.candles.last_time();
        self.set_status(ready);

        // Subscribe only after the baseline is applied, replaying from the tip.
        let since = self.ctx.candles.last_time();
        let subscribed = self.ports.push.subscribe(&self.ctx.series_id, since).await;
        self.ensure_active()?;
        let stream = subscribed.map_err(|error| self.fail(error))?;
        log_info!(COMPONENT, "Subscribed to {} since {:?}", self.ctx.series_id, since);

        self.event_loop(stream).await
    }

    async fn backfill(&mut self) -> ChartResult<BackfillOutcome> {
        let attempts = self.config.backfill_attempts.max(1);
        let mut previous: Option<FetchSummary> = None;
        let mut last_error: Option<ChartError> = None;
        let mut answered = false;

        for attempt in 0..attempts {
            if attempt > 0 {
                self.set_status(
                    LoadStatus::new(LoadPhase::Backfilling).with_message(format!("attempt {}/{}", attempt + 1, attempts)),
                );
                let delay =
                    backoff_delay_ms(attempt - 1, self.config.backfill_base_delay_ms, self.config.backfill_max_delay_ms);
                self.ports.timer.sleep(Duration::from_millis(delay)).await;
                self.ensure_active()?;
            }

            let query = CandlesQuery {
                series_id: self.ctx.series_id.clone(),
                since: None,
                limit: self.config.window_candles,
                bypass_cache: attempt > 0,
            };
            let fetched = self.ports.source.candles(&query).await;
            self.ensure_active()?;

            match fetched {
                Ok(response) => {
                    answered = true;
                    let readiness =
                        assess_readiness(&response.candles, response.server_head_time, self.ctx.timeframe, previous.as_ref());
                    previous = Some(FetchSummary::of(&response.candles, response.server_head_time));
                    if !response.candles.is_empty() {
                        self.ctx.candles.replace(&response.candles);
                        self.publish_candles();
                    }
                    if readiness == Readiness::Ready {
                        log_info!(COMPONENT, "Backfill settled with {} bars", self.ctx.candles.len());
                        return Ok(BackfillOutcome::Seeded);
                    }
                    log_debug!(
                        COMPONENT,
                        "Backfill attempt {} not settled: {} bars, head {:?}",
                        attempt + 1,
                        response.candles.len(),
                        response.server_head_time
                    );
                }
                Err(error) => {
                    log_warn!(COMPONENT, "Backfill attempt {} failed: {}", attempt + 1, error);
                    last_error = Some(error);
                }
            }
        }

        if !self.ctx.candles.is_empty() {
            log_warn!(COMPONENT, "Backfill did not settle; continuing with {} bars", self.ctx.candles.len());
            return Ok(BackfillOutcome::Seeded);
        }
        match last_error {
            Some(error) if !answered => Err(self.fail(error)),
            _ => Ok(BackfillOutcome::Empty),
        }
    }

    /// Best effort: live frame first, then overlay delta + factor slices.
    /// Only cancellation is propagated.
    async fn load_baseline(&mut self) -> ChartResult<()> {
        if self.config.use_live_frame {
            match self.fetch_live_frame().await {
                Ok(frame) => return self.apply_live_frame(frame).await,
                Err(ChartError::Cancelled) => return Err(ChartError::Cancelled),
                Err(error) => log_warn!(COMPONENT, "Live frame unavailable, using baseline delta: {}", error),
            }
        }
        self.load_baseline_delta().await
    }

    async fn fetch_live_frame(&mut self) -> ChartResult<LiveFrame> {
        let query =
            LiveFrameQuery { series_id: self.ctx.series_id.clone(), window_candles: self.config.window_candles };
        let mut conflicts = 0;
        loop {
            let fetched = self.ports.source.live_frame(&query).await;
            self.ensure_active()?;
            match fetched {
                Err(error) if error.is_conflict() && conflicts < self.config.live_frame_conflict_retries => {
                    conflicts += 1;
                    log_debug!(COMPONENT, "Live frame not ready ({}), retry {}", error, conflicts);
                    self.ports.timer.sleep(Duration::from_millis(self.config.live_frame_retry_delay_ms)).await;
                    self.ensure_active()?;
                }
                other => return other,
            }
        }
    }

    async fn apply_live_frame(&mut self, frame: LiveFrame) -> ChartResult<()> {
        if self.ctx.candles.apply_batch(&frame.candles) {
            self.publish_candles();
        }
        self.ctx.apply_delta(&frame.draw_state);

        match frame.factor_slices {
            Some(slices) => {
                let tip = self.ctx.candles.last_time();
                self.ctx.apply_factors(slices, tip);
            }
            None => self.load_tip_factors().await?,
        }
        self.publish_overlays();
        Ok(())
    }

    async fn load_tip_factors(&mut self) -> ChartResult<()> {
        let Some(tip) = self.ctx.candles.last_time() else {
            return Ok(());
        };
        let query =
            FactorQuery { series_id: self.ctx.series_id.clone(), at_time: tip, window_candles: self.config.window_candles };
        let fetched = self.ports.source.factor_slices(&query).await;
        self.ensure_active()?;
        match fetched {
            Ok(slices) => self.ctx.apply_factors(slices, Some(tip)),
            Err(error) => log_warn!(COMPONENT, "Factor slices at {} failed: {}", tip, error),
        }
        Ok(())
    }

    async fn load_baseline_delta(&mut self) -> ChartResult<()> {
        let Some(tip) = self.ctx.candles.last_time() else {
            return Ok(());
        };
        let delta_query = OverlayDeltaQuery {
            series_id: self.ctx.series_id.clone(),
            cursor_version_id: Cursor::RESYNC.version_id,
            window_candles: self.config.window_candles,
            at_time: Some(tip),
        };
        let factor_query =
            FactorQuery { series_id: self.ctx.series_id.clone(), at_time: tip, window_candles: self.config.window_candles };

        let source = Rc::clone(&self.ports.source);
        let (delta, factors) = join!(source.overlay_delta(&delta_query), source.factor_slices(&factor_query));
        self.ensure_active()?;

        match delta {
            Ok(delta) => self.ctx.apply_delta(&delta),
            Err(error) => log_warn!(COMPONENT, "Baseline overlay delta failed: {}", error),
        }
        match factors {
            Ok(slices) => self.ctx.apply_factors(slices, Some(tip)),
            Err(error) => log_warn!(COMPONENT, "Baseline factor slices failed: {}", error),
        }
        self.publish_overlays();
        Ok(())
    }

    async fn event_loop(&mut self, stream: PushStream) -> ChartResult<LoadPhase> {
        let mut events = stream.fuse();
        let mut work: WorkQueue = FuturesUnordered::new();

        loop {
            let step = select_biased! {
                done = work.select_next_some() => Step::Work(done),
                message = events.next() => Step::Push(message),
            };
            self.ensure_active()?;

            match step {
                Step::Work(done) => self.on_work(done, &mut work),
                Step::Push(Some(Ok(message))) => self.on_push(message, &mut work).await?,
                Step::Push(Some(Err(error))) => return Err(self.fail(error)),
                Step::Push(None) => return Err(self.fail(ChartError::PushChannel("push channel closed".to_string()))),
            }
        }
    }

    async fn on_push(&mut self, message: PushMessage, work: &mut WorkQueue) -> ChartResult<()> {
        log_debug!(COMPONENT, "Push message: {}", message.kind());
        match message {
            PushMessage::CandlesBatch { candles } => {
                if self.ctx.candles.apply_batch(&candles) {
                    self.publish_candles();
                }
                if let Some(last) = candles.iter().map(|c| c.time).max() {
                    self.follow(last, work);
                }
            }
            PushMessage::CandleForming { candle } => {
                // Not final yet: no immediate follow, only the passive tip path.
                if self.ctx.candles.apply_forming(candle) {
                    self.publish_candles();
                }
                self.arm_tip_debounce(work);
            }
            PushMessage::CandleClosed { candle } => {
                if self.ctx.candles.apply(candle) {
                    self.publish_candles();
                }
                let mut status = LoadStatus::new(LoadPhase::Ready);
                status.last_bar_time = Some(candle.time);
                self.set_status(status);
                self.follow(candle.time, work);
            }
            PushMessage::Gap { expected_next_time, actual_time } => {
                self.resync_after_gap(expected_next_time, actual_time, work).await?;
            }
            PushMessage::System { event, message } => {
                log_info!(
                    COMPONENT,
                    "System message {}: {}",
                    event.as_deref().unwrap_or("-"),
                    message.as_deref().unwrap_or("")
                );
            }
        }
        Ok(())
    }

    async fn resync_after_gap(
        &mut self,
        expected_next_time: Option<i64>,
        actual_time: Option<i64>,
        work: &mut WorkQueue,
    ) -> ChartResult<()> {
        log_warn!(COMPONENT, "Gap detected (expected {:?}, got {:?}); resyncing", expected_next_time, actual_time);

        // Results of follows issued before the gap describe stale state.
        self.scheduler.reset();
        self.debouncer.cancel();
        *work = FuturesUnordered::new();

        let since = expected_next_time.map(|t| t - self.ctx.timeframe.seconds()).or(self.ctx.candles.last_time());
        let query = CandlesQuery {
            series_id: self.ctx.series_id.clone(),
            since,
            limit: self.config.window_candles,
            bypass_cache: true,
        };
        let fetched = self.ports.source.candles(&query).await;
        self.ensure_active()?;
        match fetched {
            Ok(response) => {
                if self.ctx.candles.apply_batch(&response.candles) {
                    self.publish_candles();
                }
            }
            Err(error) => log_warn!(COMPONENT, "Gap refetch since {:?} failed: {}", since, error),
        }

        self.ctx.reset_overlays();
        self.load_baseline().await?;
        self.publish_overlays();
        Ok(())
    }

    fn on_work(&mut self, done: Work, work: &mut WorkQueue) {
        match done {
            Work::Followed { target, result } => {
                self.apply_follow(target, result);
                self.publish_overlays();
                if let FollowNext::Run(next) = self.scheduler.complete(self.ctx.last_factor_time) {
                    log_debug!(COMPONENT, "Follow pass for {}", next);
                    work.push(self.follow_task(next));
                }
            }
            Work::TipDebounce(generation) => {
                if !self.debouncer.fire(generation) {
                    return;
                }
                if let Some(tip) = self.ctx.candles.last_time() {
                    if self.ctx.last_factor_time != Some(tip) {
                        self.follow(tip, work);
                    }
                }
            }
        }
    }

    fn follow(&mut self, target: i64, work: &mut WorkQueue) {
        match self.scheduler.begin(target) {
            FollowDecision::Start(time) => work.push(self.follow_task(time)),
            FollowDecision::Coalesced => {
                log_debug!(COMPONENT, "Follow to {} coalesced (pending {:?})", target, self.scheduler.pending());
            }
        }
    }

    fn arm_tip_debounce(&mut self, work: &mut WorkQueue) {
        let generation = self.debouncer.arm();
        let sleep = self.ports.timer.sleep(Duration::from_millis(self.config.tip_follow_debounce_ms));
        work.push(sleep.map(move |_| Work::TipDebounce(generation)).boxed_local());
    }

    fn follow_task(&self, target: i64) -> LocalBoxFuture<'static, Work> {
        let source = Rc::clone(&self.ports.source);
        let series_id = self.ctx.series_id.clone();
        let window_candles = self.config.window_candles;
        let cursor = self.ctx.catalog.cursor().version_id;

        match self.config.follow_source {
            FollowSource::Slices => async move {
                let delta_query = OverlayDeltaQuery {
                    series_id: series_id.clone(),
                    cursor_version_id: cursor,
                    window_candles,
                    at_time: Some(target),
                };
                let factor_query = FactorQuery { series_id, at_time: target, window_candles };
                let (delta, factors) = join!(source.overlay_delta(&delta_query), source.factor_slices(&factor_query));
                Work::Followed { target, result: FollowResult::Slices { delta, factors } }
            }
            .boxed_local(),
            FollowSource::Poll => async move {
                let query = DeltaPollQuery { series_id, after_id: cursor, window_candles };
                let result = source.delta_poll(&query).await;
                Work::Followed { target, result: FollowResult::Poll(result) }
            }
            .boxed_local(),
        }
    }

    fn apply_follow(&mut self, target: i64, result: FollowResult) {
        match result {
            FollowResult::Slices { delta, factors } => {
                match delta {
                    Ok(delta) => self.ctx.apply_delta(&delta),
                    Err(error) => log_warn!(COMPONENT, "Overlay follow to {} failed: {}", target, error),
                }
                match factors {
                    Ok(slices) => self.ctx.apply_factors(slices, Some(target)),
                    Err(error) => log_warn!(COMPONENT, "Factor follow to {} failed: {}", target, error),
                }
            }
            FollowResult::Poll(Ok(response)) => {
                let mut latest_factors = None;
                for record in response.records {
                    if let Some(delta) = &record.draw_delta {
                        self.ctx.apply_delta(delta);
                    }
                    if record.factor_slices.is_some() {
                        latest_factors = record.factor_slices;
                    }
                }
                // The poll reports everything up to `target`; nothing new is still current.
                match latest_factors {
                    Some(slices) => self.ctx.apply_factors(slices, Some(target)),
                    None => self.ctx.last_factor_time = Some(target),
                }
            }
            FollowResult::Poll(Err(error)) => log_warn!(COMPONENT, "Delta poll for {} failed: {}", target, error),
        }
    }

    fn ensure_active(&self) -> ChartResult<()> {
        if self.token.is_active() { Ok(()) } else { Err(ChartError::Cancelled) }
    }

    /// Surface a terminal failure and hand it back for propagation.
    fn fail(&mut self, error: ChartError) -> ChartError {
        log_error!(COMPONENT, "Session for {} failed: {}", self.ctx.series_id, error);
        self.set_status(LoadStatus::new(LoadPhase::Error).with_message(error.detail()));
        error
    }

    fn set_status(&mut self, status: LoadStatus) {
        if !self.token.is_active() {
            return;
        }
        if status.phase != self.ctx.status.phase {
            log_info!(COMPONENT, "Load phase {} -> {}", self.ctx.status.phase, status.phase);
        }
        self.ctx.status = status;
        self.ports.observer.on_status(&self.ctx.status);
    }

    fn publish_candles(&mut self) {
        if !self.token.is_active() {
            return;
        }
        self.ports.observer.on_candles(&self.ctx.candles_snapshot());
        self.publish_overlays();
    }

    fn publish_overlays(&mut self) {
        if !self.token.is_active() {
            return;
        }
        if self.ctx.refresh_overlays() {
            self.ports.observer.on_overlays(&self.ctx.overlays, &self.ctx.pens, self.ctx.overlay_counts());
        }
    }
}
