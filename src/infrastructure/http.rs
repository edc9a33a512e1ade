use futures::FutureExt;
use gloo::net::http::{Request, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cell::RefCell;

use crate::application::config::ApiConfig;
use crate::domain::errors::{ChartError, ChartResult, extract_error_detail};
use crate::domain::factor::FactorSlices;
use crate::domain::logging::{LogComponent, get_time_provider};
use crate::domain::overlay::OverlayDelta;
use crate::domain::replay::ReplayWindowBundle;
use crate::domain::repositories::{
    BuildRequest, CandlesQuery, CandlesResponse, ChartDataSource, CoverageRequest, DeltaPollQuery, DeltaPollResponse,
    FactorQuery, JobStatus, JobTicket, LiveFrame, LiveFrameQuery, OverlayDeltaQuery, ReplaySource,
};
use crate::infrastructure::request_cache::RequestCache;
use crate::{log_debug, log_warn};

const COMPONENT: LogComponent = LogComponent::Infrastructure("Http");

pub const CANDLES_PATH: &str = "/api/market/candles";
pub const OVERLAY_DELTA_PATH: &str = "/api/draw/delta";
pub const FACTOR_SLICES_PATH: &str = "/api/factor/slices";
pub const LIVE_FRAME_PATH: &str = "/api/frame/live";
pub const DELTA_POLL_PATH: &str = "/api/draw/delta_poll";
pub const REPLAY_BUILD_PATH: &str = "/api/replay/build";
pub const REPLAY_STATUS_PATH: &str = "/api/replay/status";
pub const REPLAY_COVERAGE_PATH: &str = "/api/replay/ensure_coverage";
pub const REPLAY_COVERAGE_STATUS_PATH: &str = "/api/replay/coverage_status";
pub const REPLAY_WINDOW_PATH: &str = "/api/replay/window";

type Params = Vec<(&'static str, String)>;

thread_local! {
    // Process scope: shared by every session on this thread, empty at start.
    static CANDLE_CACHE: RefCell<RequestCache<CandlesResponse>> = RefCell::new(RequestCache::new(2000));
}

/// Chart backend over HTTP (gloo-net).
#[derive(Debug, Clone)]
pub struct HttpChartSource {
    base_url: String,
    cache_ttl_ms: u64,
}

impl HttpChartSource {
    pub fn new(config: &ApiConfig) -> Self {
        Self { base_url: config.base_url.trim_end_matches('/').to_string(), cache_ttl_ms: config.candle_cache_ttl_ms }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn cached_candles(&self, url: String, params: Params) -> ChartResult<CandlesResponse> {
        let key = canonical_key(&url, &params);
        let now = get_time_provider().current_timestamp();
        let ttl = self.cache_ttl_ms;
        let request = CANDLE_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            cache.set_ttl_ms(ttl);
            cache.get_or_start(&key, now, move || get_json(url, params).boxed_local())
        });

        let result = request.await;
        if result.is_err() {
            CANDLE_CACHE.with(|cache| cache.borrow_mut().remove(&key));
        }
        result
    }
}

impl ChartDataSource for HttpChartSource {
    async fn candles(&self, query: &CandlesQuery) -> ChartResult<CandlesResponse> {
        let url = self.url(CANDLES_PATH);
        let params = candles_params(query);
        if query.bypass_cache {
            return get_json(url, params).await;
        }
        self.cached_candles(url, params).await
    }

    async fn overlay_delta(&self, query: &OverlayDeltaQuery) -> ChartResult<OverlayDelta> {
        get_json(self.url(OVERLAY_DELTA_PATH), overlay_delta_params(query)).await
    }

    async fn factor_slices(&self, query: &FactorQuery) -> ChartResult<FactorSlices> {
        get_json(self.url(FACTOR_SLICES_PATH), factor_params(query)).await
    }

    async fn live_frame(&self, query: &LiveFrameQuery) -> ChartResult<LiveFrame> {
        let params = vec![
            ("series_id", query.series_id.value().to_string()),
            ("window_candles", query.window_candles.to_string()),
        ];
        get_json(self.url(LIVE_FRAME_PATH), params).await
    }

    async fn delta_poll(&self, query: &DeltaPollQuery) -> ChartResult<DeltaPollResponse> {
        let params = vec![
            ("series_id", query.series_id.value().to_string()),
            ("after_id", query.after_id.to_string()),
            ("window_candles", query.window_candles.to_string()),
        ];
        get_json(self.url(DELTA_POLL_PATH), params).await
    }
}

impl ReplaySource for HttpChartSource {
    async fn build(&self, request: &BuildRequest) -> ChartResult<JobTicket> {
        post_json(self.url(REPLAY_BUILD_PATH), request).await
    }

    async fn status(&self, job_id: &str) -> ChartResult<JobStatus> {
        get_json(self.url(REPLAY_STATUS_PATH), vec![("job_id", job_id.to_string())]).await
    }

    async fn ensure_coverage(&self, request: &CoverageRequest) -> ChartResult<JobTicket> {
        post_json(self.url(REPLAY_COVERAGE_PATH), request).await
    }

    async fn coverage_status(&self, job_id: &str) -> ChartResult<JobStatus> {
        get_json(self.url(REPLAY_COVERAGE_STATUS_PATH), vec![("job_id", job_id.to_string())]).await
    }

    async fn window(&self, job_id: &str, target_idx: usize) -> ChartResult<ReplayWindowBundle> {
        let params = vec![("job_id", job_id.to_string()), ("target_idx", target_idx.to_string())];
        get_json(self.url(REPLAY_WINDOW_PATH), params).await
    }
}

pub fn candles_params(query: &CandlesQuery) -> Params {
    let mut params = vec![("series_id", query.series_id.value().to_string()), ("limit", query.limit.to_string())];
    if let Some(since) = query.since {
        params.push(("since", since.to_string()));
    }
    params
}

pub fn overlay_delta_params(query: &OverlayDeltaQuery) -> Params {
    let mut params = vec![
        ("series_id", query.series_id.value().to_string()),
        ("cursor_version_id", query.cursor_version_id.to_string()),
        ("window_candles", query.window_candles.to_string()),
    ];
    if let Some(at_time) = query.at_time {
        params.push(("at_time", at_time.to_string()));
    }
    params
}

pub fn factor_params(query: &FactorQuery) -> Params {
    vec![
        ("series_id", query.series_id.value().to_string()),
        ("at_time", query.at_time.to_string()),
        ("window_candles", query.window_candles.to_string()),
    ]
}

/// Stable cache key: URL plus parameters sorted by name.
pub fn canonical_key(url: &str, params: &[(&'static str, String)]) -> String {
    let mut sorted: Vec<&(&'static str, String)> = params.iter().collect();
    sorted.sort();
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", url, query.join("&"))
}

/// Map a non-success status to the error taxonomy. 409 means "not ready yet".
pub fn status_error(status: u16, body: &str) -> ChartError {
    let detail = extract_error_detail(body);
    let detail = if detail.is_empty() { format!("HTTP {}", status) } else { detail };
    if status == 409 { ChartError::Conflict(detail) } else { ChartError::Http { status, detail } }
}

async fn get_json<T: DeserializeOwned>(url: String, params: Params) -> ChartResult<T> {
    log_debug!(COMPONENT, "GET {} {:?}", url, params);
    let response = Request::get(&url)
        .query(params.iter().map(|(k, v)| (*k, v.as_str())))
        .send()
        .await
        .map_err(|e| ChartError::Network(format!("GET {}: {}", url, e)))?;
    decode(response).await
}

async fn post_json<B: Serialize, T: DeserializeOwned>(url: String, body: &B) -> ChartResult<T> {
    log_debug!(COMPONENT, "POST {}", url);
    let request = Request::post(&url).json(body).map_err(|e| ChartError::Decode(format!("POST {}: {}", url, e)))?;
    let response = request.send().await.map_err(|e| ChartError::Network(format!("POST {}: {}", url, e)))?;
    decode(response).await
}

/// Decode a JSON body, or map the status and body text to a `ChartError`.
pub async fn decode<T: DeserializeOwned>(response: Response) -> ChartResult<T> {
    if response.ok() {
        return response.json::<T>().await.map_err(|e| ChartError::Decode(format!("{}: {}", response.url(), e)));
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = status_error(status, &body);
    log_warn!(COMPONENT, "{} answered {}: {}", response.url(), status, error.detail());
    Err(error)
}
