use leptos::SignalSet;
use std::sync::Arc;

use crate::application::session::{ChartObserver, LoadStatus, ReplayPosition};
use crate::domain::factor::PenAnchorView;
use crate::domain::market_data::Candle;
use crate::domain::overlay::{OverlayCounts, OverlayRenderModel};
use crate::global_state::globals;

/// Publishes session output into the global leptos signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalObserver;

impl ChartObserver for SignalObserver {
    fn on_status(&self, status: &LoadStatus) {
        let g = globals();
        g.load_phase.set(status.phase);
        g.status_message.set(status.message.clone());
        g.last_bar_time.set(status.last_bar_time);
    }

    fn on_candles(&self, candles: &Arc<Vec<Candle>>) {
        let g = globals();
        g.candle_count.set(candles.len());
        g.candles.set(Arc::clone(candles));
    }

    fn on_overlays(&self, overlays: &OverlayRenderModel, pens: &PenAnchorView, counts: OverlayCounts) {
        let g = globals();
        g.overlays.set(overlays.clone());
        g.pens.set(pens.clone());
        g.overlay_counts.set(counts);
    }

    fn on_replay_position(&self, position: ReplayPosition) {
        globals().replay_position.set(position);
    }
}
