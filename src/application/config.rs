use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::ChartResult;
use crate::domain::overlay::VisibilityFlags;

/// Runtime configuration handed over from JavaScript as JSON.
/// Every section and field is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub api: ApiConfig,
    pub live: LiveConfig,
    pub render: RenderConfig,
    pub replay: ReplayConfig,
}

impl ChartConfig {
    pub fn from_json(raw: &str) -> ChartResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub ws_url: String,
    pub candle_cache_ttl_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: String::new(), ws_url: "/ws/market".to_string(), candle_cache_ttl_ms: 2000 }
    }
}

/// Where the follow pass reads overlay updates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowSource {
    /// `overlay_delta` and `factor_slices` at the followed time.
    #[default]
    Slices,
    /// `delta_poll` after the current cursor.
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub window_candles: usize,
    pub backfill_attempts: u32,
    pub backfill_base_delay_ms: u64,
    pub backfill_max_delay_ms: u64,
    pub live_frame_conflict_retries: u32,
    pub live_frame_retry_delay_ms: u64,
    pub tip_follow_debounce_ms: u64,
    pub follow_source: FollowSource,
    pub use_live_frame: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            window_candles: 2000,
            backfill_attempts: 6,
            backfill_base_delay_ms: 250,
            backfill_max_delay_ms: 4000,
            live_frame_conflict_retries: 3,
            live_frame_retry_delay_ms: 300,
            tip_follow_debounce_ms: 1000,
            follow_source: FollowSource::Slices,
            use_live_frame: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub pen_segment_cap: usize,
    /// Feature key -> forced visibility.
    pub visibility: HashMap<String, bool>,
    /// Child feature key -> parent feature key.
    pub visibility_parents: HashMap<String, String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { pen_segment_cap: 200, visibility: HashMap::new(), visibility_parents: HashMap::new() }
    }
}

impl RenderConfig {
    pub fn visibility_flags(&self) -> VisibilityFlags {
        VisibilityFlags { overrides: self.visibility.clone(), parents: self.visibility_parents.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub window_size: usize,
    pub snapshot_interval: usize,
    pub build_poll_interval_ms: u64,
    pub build_poll_attempts: u32,
    /// Bars before a window end at which the next window is prefetched.
    pub prefetch_margin: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            window_size: 500,
            snapshot_interval: 25,
            build_poll_interval_ms: 500,
            build_poll_attempts: 240,
            prefetch_margin: 50,
        }
    }
}
