use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

use crate::application::config::{ChartConfig, ReplayConfig};
use crate::application::session::{ChartObserver, LoadPhase, LoadStatus, ReplayPosition, SessionToken};
use crate::domain::errors::{ChartError, ChartResult, ErrorClass};
use crate::domain::factor::{ChartMode, FactorSlices, PenAnchorView, derive};
use crate::domain::logging::LogComponent;
use crate::domain::market_data::{Candle, SeriesId, TimeRange};
use crate::domain::overlay::{OverlayInstruction, OverlayRenderModel, VisibilityFlags};
use crate::domain::replay::ReplayWindowBundle;
use crate::domain::repositories::{
    BuildRequest, CoverageRequest, JobState, JobStatus, ReplayMetadata, ReplaySource, Timer,
};
use crate::{log_debug, log_error, log_info, log_warn};

const COMPONENT: LogComponent = LogComponent::Application("Replay");

type WindowFuture = Shared<LocalBoxFuture<'static, ChartResult<Rc<ReplayWindowBundle>>>>;

/// Collaborators of a replay session. The spawner runs window prefetches.
pub struct ReplayPorts<R> {
    pub source: Rc<R>,
    pub timer: Rc<dyn Timer>,
    pub observer: Rc<dyn ChartObserver>,
    pub spawner: Rc<dyn LocalSpawn>,
}

/// Complete chart state at one replay index.
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub position: ReplayPosition,
    pub window_index: usize,
    pub candles: Arc<Vec<Candle>>,
    pub active_ids: BTreeSet<String>,
    /// Shared with every frame of the same window.
    pub catalog: Rc<BTreeMap<String, OverlayInstruction>>,
    pub factors: FactorSlices,
    pub overlays: OverlayRenderModel,
    pub pens: PenAnchorView,
}

#[derive(Debug, Clone, Copy, Display)]
#[strum(serialize_all = "lowercase")]
enum JobKind {
    Coverage,
    Build,
}

struct LoadedWindow {
    index: usize,
    catalog: Rc<BTreeMap<String, OverlayInstruction>>,
}

/// Paginated loader of replay windows and per-index state reconstruction.
///
/// Windows are fetched at most once per index: concurrent requests for the
/// same window share one in-progress future, and completed bundles are kept
/// for the lifetime of the engine.
pub struct ReplayWindowEngine<R> {
    ports: ReplayPorts<R>,
    config: ReplayConfig,
    window_candles: usize,
    pen_segment_cap: usize,
    visibility: VisibilityFlags,
    series_id: SeriesId,
    job_id: Option<String>,
    metadata: Option<ReplayMetadata>,
    window_size: usize,
    windows: HashMap<usize, Rc<ReplayWindowBundle>>,
    in_progress: HashMap<usize, WindowFuture>,
    current: Option<LoadedWindow>,
    window_fetches: usize,
    catalog_merges: usize,
    token: SessionToken,
}

impl<R: ReplaySource + 'static> ReplayWindowEngine<R> {
    pub fn new(series_id: SeriesId, config: &ChartConfig, ports: ReplayPorts<R>) -> Self {
        Self {
            ports,
            config: config.replay.clone(),
            window_candles: config.live.window_candles,
            pen_segment_cap: config.render.pen_segment_cap,
            visibility: config.render.visibility_flags(),
            series_id,
            job_id: None,
            metadata: None,
            window_size: config.replay.window_size.max(1),
            windows: HashMap::new(),
            in_progress: HashMap::new(),
            current: None,
            window_fetches: 0,
            catalog_merges: 0,
            token: SessionToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one shared with the UI handle.
    pub fn with_token(mut self, token: SessionToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> SessionToken {
        self.token.clone()
    }

    pub fn stop(&mut self) {
        self.token.cancel();
        self.in_progress.clear();
    }

    pub fn total(&self) -> usize {
        self.metadata.as_ref().map_or(0, |m| m.total_candles)
    }

    pub fn metadata(&self) -> Option<&ReplayMetadata> {
        self.metadata.as_ref()
    }

    pub fn window_fetches(&self) -> usize {
        self.window_fetches
    }

    pub fn catalog_merges(&self) -> usize {
        self.catalog_merges
    }

    pub fn is_cached(&self, window_index: usize) -> bool {
        self.windows.contains_key(&window_index)
    }

    pub fn is_in_progress(&self, window_index: usize) -> bool {
        self.in_progress.contains_key(&window_index)
    }

    /// Ensure history coverage, build the replay package and wait for both jobs.
    pub async fn prepare(&mut self) -> ChartResult<ReplayMetadata> {
        self.set_status(LoadStatus::new(LoadPhase::Loading).with_message("ensuring history coverage"));
        let request = CoverageRequest { series_id: self.series_id.clone(), target_candles: self.window_candles };
        let ticket = self.ports.source.ensure_coverage(&request).await;
        self.ensure_active()?;
        let ticket = ticket.map_err(|error| self.fail(error))?;
        self.wait_for_job(&ticket.job_id, JobKind::Coverage).await?;

        self.set_status(LoadStatus::new(LoadPhase::Loading).with_message("building replay package"));
        let request = BuildRequest {
            series_id: self.series_id.clone(),
            window_candles: self.window_candles,
            window_size: self.config.window_size,
            snapshot_interval: self.config.snapshot_interval,
        };
        let ticket = self.ports.source.build(&request).await;
        self.ensure_active()?;
        let ticket = ticket.map_err(|error| self.fail(error))?;
        let status = self.wait_for_job(&ticket.job_id, JobKind::Build).await?;

        let metadata = status.metadata.unwrap_or_default();
        if metadata.window_size > 0 {
            self.window_size = metadata.window_size;
        }
        self.job_id = Some(ticket.job_id);
        self.metadata = Some(metadata.clone());
        self.windows.clear();
        self.in_progress.clear();
        self.current = None;

        if metadata.total_candles == 0 {
            self.set_status(LoadStatus::new(LoadPhase::Empty).with_message("replay package has no candles"));
        } else {
            log_info!(
                COMPONENT,
                "Replay ready: {} bars in windows of {}",
                metadata.total_candles,
                self.window_size
            );
            self.set_status(LoadStatus::new(LoadPhase::Ready));
        }
        Ok(metadata)
    }

    async fn wait_for_job(&mut self, job_id: &str, kind: JobKind) -> ChartResult<JobStatus> {
        let attempts = self.config.build_poll_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                self.ports.timer.sleep(Duration::from_millis(self.config.build_poll_interval_ms)).await;
                self.ensure_active()?;
            }

            let polled = match kind {
                JobKind::Coverage => self.ports.source.coverage_status(job_id).await,
                JobKind::Build => self.ports.source.status(job_id).await,
            };
            self.ensure_active()?;

            match polled {
                Ok(status) => match status.status {
                    JobState::Done => return Ok(status),
                    JobState::Error => {
                        let detail = status.error.unwrap_or_else(|| format!("{} job {} failed", kind, job_id));
                        return Err(self.fail(ChartError::Replay(detail)));
                    }
                    JobState::Building => log_debug!(COMPONENT, "{} job {} still running", kind, job_id),
                },
                Err(error) if error.class() == ErrorClass::Terminal => return Err(self.fail(error)),
                Err(error) => log_warn!(COMPONENT, "Polling {} job {} failed: {}", kind, job_id, error),
            }
        }
        Err(self.fail(ChartError::Replay(format!("{} job {} did not finish", kind, job_id))))
    }

    /// Reconstruct the chart at `index` (clamped to the package).
    pub async fn seek(&mut self, index: usize) -> ChartResult<ReplayFrame> {
        let total = self.total();
        if total == 0 {
            return Err(ChartError::Replay("replay package is empty".to_string()));
        }
        let index = index.min(total - 1);
        let window_index = index / self.window_size;
        let bundle = self.load_window(window_index).await?;

        let catalog = match &self.current {
            Some(loaded) if loaded.index == window_index => Rc::clone(&loaded.catalog),
            _ => {
                self.catalog_merges += 1;
                let catalog = Rc::new(bundle.window.merged_catalog());
                self.current = Some(LoadedWindow { index: window_index, catalog: Rc::clone(&catalog) });
                catalog
            }
        };

        let window = &bundle.window;
        let candles: Arc<Vec<Candle>> = Arc::new(window.candles_through(index).to_vec());
        let focus_time = window.candle_at(index).map(|c| c.time);
        let active_ids = window.active_ids_at(index);
        let factors = focus_time
            .map(|time| bundle.factor_snapshots.slices_at(self.series_id.value(), time))
            .unwrap_or_default();

        let range = match (candles.first(), candles.last()) {
            (Some(first), Some(last)) => Some(TimeRange::new(first.time, last.time)),
            _ => None,
        };
        let overlays = OverlayRenderModel::rebuild(&active_ids, &catalog, range, &self.visibility);
        let pens = derive(Some(&factors), &candles, ChartMode::Replay, self.pen_segment_cap);
        let position = ReplayPosition { index, total, focus_time };

        if self.token.is_active() {
            let mut counts = overlays.counts();
            if !pens.pen_segments.is_empty() {
                counts.pens = pens.pen_segments.len();
            }
            self.ports.observer.on_replay_position(position);
            self.ports.observer.on_candles(&candles);
            self.ports.observer.on_overlays(&overlays, &pens, counts);
        }

        if index + self.config.prefetch_margin >= window.end_idx && window.end_idx + 1 < total {
            self.prefetch(window_index + 1);
        }

        Ok(ReplayFrame { position, window_index, candles, active_ids, catalog, factors, overlays, pens })
    }

    /// Start fetching a window in the background unless it is cached or
    /// already in flight.
    pub fn prefetch(&mut self, window_index: usize) {
        if self.is_cached(window_index) || self.is_in_progress(window_index) {
            return;
        }
        match self.window_future(window_index) {
            Ok(future) => {
                log_debug!(COMPONENT, "Prefetching replay window {}", window_index);
                if let Err(error) = self.ports.spawner.spawn_local(future.map(|_| ())) {
                    log_warn!(COMPONENT, "Prefetch of window {} not spawned: {}", window_index, error);
                    self.in_progress.remove(&window_index);
                }
            }
            Err(error) => log_warn!(COMPONENT, "Prefetch of window {} skipped: {}", window_index, error),
        }
    }

    async fn load_window(&mut self, window_index: usize) -> ChartResult<Rc<ReplayWindowBundle>> {
        if let Some(bundle) = self.windows.get(&window_index) {
            return Ok(Rc::clone(bundle));
        }

        let future = self.window_future(window_index)?;
        let result = future.await;
        self.ensure_active()?;
        self.in_progress.remove(&window_index);

        match result {
            Ok(bundle) => {
                self.windows.insert(window_index, Rc::clone(&bundle));
                Ok(bundle)
            }
            Err(error) => {
                log_warn!(COMPONENT, "Replay window {} failed: {}", window_index, error);
                Err(error)
            }
        }
    }

    /// Shared fetch for a window, reusing the in-progress one if present.
    fn window_future(&mut self, window_index: usize) -> ChartResult<WindowFuture> {
        if let Some(bundle) = self.windows.get(&window_index) {
            return Ok(future::ready(Ok(Rc::clone(bundle))).boxed_local().shared());
        }
        let failed = self.in_progress.get(&window_index).map(|in_flight| matches!(in_flight.peek(), Some(Err(_))));
        match failed {
            Some(false) => {
                if let Some(in_flight) = self.in_progress.get(&window_index) {
                    return Ok(in_flight.clone());
                }
            }
            // A finished, failed prefetch is not reused: fetch again.
            Some(true) => {
                log_debug!(COMPONENT, "Discarding failed prefetch of window {}", window_index);
                self.in_progress.remove(&window_index);
            }
            None => {}
        }

        let job_id = self.job_id.clone().ok_or_else(|| ChartError::Replay("replay package not prepared".to_string()))?;
        let source = Rc::clone(&self.ports.source);
        let target_idx = window_index * self.window_size;
        let fetch = async move {
            let bundle = source.window(&job_id, target_idx).await?;
            Ok::<_, ChartError>(Rc::new(ReplayWindowBundle {
                window: bundle.window.normalized(),
                factor_snapshots: bundle.factor_snapshots.normalized(),
            }))
        }
        .boxed_local()
        .shared();

        self.window_fetches += 1;
        self.in_progress.insert(window_index, fetch.clone());
        Ok(fetch)
    }

    fn ensure_active(&self) -> ChartResult<()> {
        if self.token.is_active() { Ok(()) } else { Err(ChartError::Cancelled) }
    }

    fn fail(&mut self, error: ChartError) -> ChartError {
        log_error!(COMPONENT, "Replay for {} failed: {}", self.series_id, error);
        self.set_status(LoadStatus::new(LoadPhase::Error).with_message(error.detail()));
        error
    }

    fn set_status(&self, status: LoadStatus) {
        if self.token.is_active() {
            self.ports.observer.on_status(&status);
        }
    }
}
