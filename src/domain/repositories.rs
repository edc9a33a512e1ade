//! Ports to the chart backend. Implemented over HTTP/WebSocket in
//! `infrastructure`, and by in-memory fakes in tests.

use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::ChartResult;
use crate::domain::events::PushMessage;
use crate::domain::factor::FactorSlices;
use crate::domain::market_data::{Candle, SeriesId};
use crate::domain::overlay::OverlayDelta;
use crate::domain::replay::ReplayWindowBundle;

#[derive(Debug, Clone, PartialEq)]
pub struct CandlesQuery {
    pub series_id: SeriesId,
    /// Exclusive lower bound on bar time.
    pub since: Option<i64>,
    pub limit: usize,
    /// Skip the request de-dup cache.
    pub bypass_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandlesResponse {
    #[serde(default)]
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub server_head_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayDeltaQuery {
    pub series_id: SeriesId,
    pub cursor_version_id: i64,
    pub window_candles: usize,
    pub at_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorQuery {
    pub series_id: SeriesId,
    pub at_time: i64,
    pub window_candles: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrameQuery {
    pub series_id: SeriesId,
    pub window_candles: usize,
}

/// Consolidated candles + overlay + factor response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveFrame {
    #[serde(default)]
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub server_head_time: Option<i64>,
    #[serde(default)]
    pub draw_state: OverlayDelta,
    #[serde(default)]
    pub factor_slices: Option<FactorSlices>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPollQuery {
    pub series_id: SeriesId,
    pub after_id: i64,
    pub window_candles: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaPollRecord {
    #[serde(default)]
    pub draw_delta: Option<OverlayDelta>,
    #[serde(default)]
    pub factor_slices: Option<FactorSlices>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaPollResponse {
    #[serde(default)]
    pub records: Vec<DeltaPollRecord>,
}

/// Read side of the live chart.
#[allow(async_fn_in_trait)]
pub trait ChartDataSource {
    async fn candles(&self, query: &CandlesQuery) -> ChartResult<CandlesResponse>;

    async fn overlay_delta(&self, query: &OverlayDeltaQuery) -> ChartResult<OverlayDelta>;

    async fn factor_slices(&self, query: &FactorQuery) -> ChartResult<FactorSlices>;

    /// May fail with `ChartError::Conflict` while the server is not ready.
    async fn live_frame(&self, query: &LiveFrameQuery) -> ChartResult<LiveFrame>;

    async fn delta_poll(&self, query: &DeltaPollQuery) -> ChartResult<DeltaPollResponse>;
}

pub type PushStream = LocalBoxStream<'static, ChartResult<PushMessage>>;

/// Live bar feed. The stream ends or yields an error when the channel breaks.
#[allow(async_fn_in_trait)]
pub trait PushChannel {
    /// Subscribe to a series, replaying bars after `since`.
    async fn subscribe(&self, series_id: &SeriesId, since: Option<i64>) -> ChartResult<PushStream>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub series_id: SeriesId,
    pub window_candles: usize,
    pub window_size: usize,
    pub snapshot_interval: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRequest {
    pub series_id: SeriesId,
    pub target_candles: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Building,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplayMetadata {
    #[serde(default)]
    pub total_candles: usize,
    #[serde(default)]
    pub window_size: usize,
    #[serde(default)]
    pub snapshot_interval: usize,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<ReplayMetadata>,
}

/// Historical replay package endpoints.
#[allow(async_fn_in_trait)]
pub trait ReplaySource {
    async fn build(&self, request: &BuildRequest) -> ChartResult<JobTicket>;

    async fn status(&self, job_id: &str) -> ChartResult<JobStatus>;

    async fn ensure_coverage(&self, request: &CoverageRequest) -> ChartResult<JobTicket>;

    async fn coverage_status(&self, job_id: &str) -> ChartResult<JobStatus>;

    async fn window(&self, job_id: &str, target_idx: usize) -> ChartResult<ReplayWindowBundle>;
}

/// Suspension source for retries and debouncing.
pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}
