use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use strum::{AsRefStr, Display};

use crate::domain::factor::{ChartMode, FactorSlices, PenAnchorView, derive};
use crate::domain::market_data::{Candle, CandleWindow, SeriesId, TimeRange, Timeframe};
use crate::domain::overlay::{OverlayCatalog, OverlayCounts, OverlayDelta, OverlayRenderModel, VisibilityFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Idle,
    Loading,
    Backfilling,
    Ready,
    Empty,
    Error,
}

/// Load state published to the UI banner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadStatus {
    pub phase: LoadPhase,
    pub message: Option<String>,
    /// Time of the last closed bar applied; refreshed on every close.
    pub last_bar_time: Option<i64>,
}

impl LoadStatus {
    pub fn new(phase: LoadPhase) -> Self {
        Self { phase, message: None, last_bar_time: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Default for LoadStatus {
    fn default() -> Self {
        Self::new(LoadPhase::Idle)
    }
}

/// Cooperative cancellation flag captured at session start.
///
/// Cancelling is idempotent and visible to every clone.
#[derive(Debug, Clone)]
pub struct SessionToken {
    active: Rc<Cell<bool>>,
}

impl SessionToken {
    pub fn new() -> Self {
        Self { active: Rc::new(Cell::new(true)) }
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn cancel(&self) {
        self.active.set(false);
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one live series session owns. Built per session and dropped on
/// teardown, so nothing leaks across series.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub series_id: SeriesId,
    pub timeframe: Timeframe,
    pub candles: CandleWindow,
    pub catalog: OverlayCatalog,
    pub factors: Option<FactorSlices>,
    pub last_factor_time: Option<i64>,
    pub overlays: OverlayRenderModel,
    pub pens: PenAnchorView,
    pub visibility: VisibilityFlags,
    pub status: LoadStatus,
    pen_segment_cap: usize,
    rendered: Option<RenderKey>,
    factors_dirty: bool,
}

/// Catalog and range inputs of the last overlay rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderKey {
    catalog_revision: u64,
    range: Option<TimeRange>,
}

impl SessionContext {
    pub fn new(
        series_id: SeriesId,
        timeframe: Timeframe,
        window_limit: usize,
        visibility: VisibilityFlags,
        pen_segment_cap: usize,
    ) -> Self {
        Self {
            series_id,
            timeframe,
            candles: CandleWindow::new(window_limit),
            catalog: OverlayCatalog::new(),
            factors: None,
            last_factor_time: None,
            overlays: OverlayRenderModel::default(),
            pens: PenAnchorView::default(),
            visibility,
            status: LoadStatus::default(),
            pen_segment_cap,
            rendered: None,
            factors_dirty: false,
        }
    }

    pub fn candles_snapshot(&self) -> Arc<Vec<Candle>> {
        self.candles.snapshot()
    }

    pub fn apply_delta(&mut self, delta: &OverlayDelta) {
        self.catalog.apply(delta);
    }

    /// Store factor slices fetched for `requested_time`.
    pub fn apply_factors(&mut self, slices: FactorSlices, requested_time: Option<i64>) {
        self.last_factor_time = slices.candle_time().or(requested_time);
        self.factors = Some(slices);
        self.factors_dirty = true;
    }

    /// Drop overlay and factor state, keeping candles.
    pub fn reset_overlays(&mut self) {
        self.catalog.reset();
        self.factors = None;
        self.last_factor_time = None;
        self.factors_dirty = true;
    }

    /// Rebuild derived views if the catalog, the visible range or the factors
    /// changed since the last rebuild. Returns whether anything was rebuilt.
    pub fn refresh_overlays(&mut self) -> bool {
        let key = RenderKey { catalog_revision: self.catalog.revision(), range: self.candles.time_range() };
        if self.rendered == Some(key) && !self.factors_dirty {
            return false;
        }

        self.overlays =
            OverlayRenderModel::rebuild(self.catalog.active_ids(), self.catalog.entries(), key.range, &self.visibility);
        self.pens = derive(self.factors.as_ref(), self.candles.candles(), ChartMode::Live, self.pen_segment_cap);
        self.rendered = Some(key);
        self.factors_dirty = false;
        true
    }

    pub fn overlay_counts(&self) -> OverlayCounts {
        let mut counts = self.overlays.counts();
        // Pens derived from factor history take precedence over catalog pens.
        if !self.pens.pen_segments.is_empty() {
            counts.pens = self.pens.pen_segments.len();
        }
        counts
    }
}
