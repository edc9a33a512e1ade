use leptos::*;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::application::session::{LoadPhase, ReplayPosition};
use crate::domain::factor::PenAnchorView;
use crate::domain::market_data::Candle;
use crate::domain::overlay::{OverlayCounts, OverlayRenderModel};

/// Reactive observation points read by the page and the renderer.
pub struct Globals {
    pub load_phase: RwSignal<LoadPhase>,
    pub status_message: RwSignal<Option<String>>,
    pub last_bar_time: RwSignal<Option<i64>>,
    pub candles: RwSignal<Arc<Vec<Candle>>>,
    pub candle_count: RwSignal<usize>,
    pub overlays: RwSignal<OverlayRenderModel>,
    pub pens: RwSignal<PenAnchorView>,
    pub overlay_counts: RwSignal<OverlayCounts>,
    pub replay_position: RwSignal<ReplayPosition>,
}

static GLOBALS: OnceCell<Globals> = OnceCell::new();

pub fn globals() -> &'static Globals {
    GLOBALS.get_or_init(|| Globals {
        load_phase: create_rw_signal(LoadPhase::Idle),
        status_message: create_rw_signal(None),
        last_bar_time: create_rw_signal(None),
        candles: create_rw_signal(Arc::new(Vec::new())),
        candle_count: create_rw_signal(0),
        overlays: create_rw_signal(OverlayRenderModel::default()),
        pens: create_rw_signal(PenAnchorView::default()),
        overlay_counts: create_rw_signal(OverlayCounts::default()),
        replay_position: create_rw_signal(ReplayPosition::default()),
    })
}

crate::global_signals! {
    pub load_phase => load_phase: LoadPhase,
    pub status_message => status_message: Option<String>,
    pub last_bar_time => last_bar_time: Option<i64>,
    pub candles => candles: Arc<Vec<Candle>>,
    pub candle_count => candle_count: usize,
    pub overlays => overlays: OverlayRenderModel,
    pub pens => pens: PenAnchorView,
    pub overlay_counts => overlay_counts: OverlayCounts,
    pub replay_position => replay_position: ReplayPosition,
}
