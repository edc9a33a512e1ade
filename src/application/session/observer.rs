use serde::Serialize;
use std::sync::Arc;

use super::context::LoadStatus;
use crate::domain::factor::PenAnchorView;
use crate::domain::market_data::Candle;
use crate::domain::overlay::{OverlayCounts, OverlayRenderModel};

/// Replay cursor published after every seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReplayPosition {
    pub index: usize,
    pub total: usize,
    pub focus_time: Option<i64>,
}

/// Observation points for the renderer and the surrounding UI.
///
/// Sessions only push into it; they never read UI state back.
pub trait ChartObserver {
    fn on_status(&self, status: &LoadStatus);

    fn on_candles(&self, candles: &Arc<Vec<Candle>>);

    fn on_overlays(&self, overlays: &OverlayRenderModel, pens: &PenAnchorView, counts: OverlayCounts);

    fn on_replay_position(&self, _position: ReplayPosition) {}
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ChartObserver for NullObserver {
    fn on_status(&self, _status: &LoadStatus) {}

    fn on_candles(&self, _candles: &Arc<Vec<Candle>>) {}

    fn on_overlays(&self, _overlays: &OverlayRenderModel, _pens: &PenAnchorView, _counts: OverlayCounts) {}
}
