#![allow(dead_code)]

use futures::channel::{mpsc, oneshot};
use futures::executor::LocalPool;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use futures::StreamExt;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use price_chart_overlay::application::config::ChartConfig;
use price_chart_overlay::application::session::{
    ChartObserver, LiveSessionController, LoadPhase, LoadStatus, ReplayPosition, SessionPorts, SessionToken,
};
use price_chart_overlay::domain::errors::{ChartError, ChartResult};
use price_chart_overlay::domain::events::PushMessage;
use price_chart_overlay::domain::factor::{FactorSlices, PenAnchorView};
use price_chart_overlay::domain::market_data::{Candle, SeriesId, Timeframe};
use price_chart_overlay::domain::overlay::{OverlayCounts, OverlayDelta, OverlayRenderModel};
use price_chart_overlay::domain::replay::ReplayWindowBundle;
use price_chart_overlay::domain::repositories::{
    BuildRequest, CandlesQuery, CandlesResponse, ChartDataSource, CoverageRequest, DeltaPollQuery, DeltaPollResponse,
    FactorQuery, JobStatus, JobTicket, LiveFrame, LiveFrameQuery, OverlayDeltaQuery, PushChannel, PushStream,
    ReplaySource, Timer,
};

pub const SERIES: &str = "binance:futures:BTC/USDT:1m";

pub fn bar(time: i64, close: f64) -> Candle {
    Candle::new(time, close, close, close, close)
}

/// Contiguous 1m bars whose tip equals the server head.
pub fn settled(times: &[i64]) -> CandlesResponse {
    CandlesResponse { candles: times.iter().map(|&t| bar(t, 1.0)).collect(), server_head_time: times.last().copied() }
}

/// Live data source backed by queues. An empty queue answers with an empty
/// success, except `live_frame` which answers 404 so the baseline falls back
/// to overlay delta + factor slices.
#[derive(Default)]
pub struct FakeSource {
    pub candle_responses: RefCell<VecDeque<ChartResult<CandlesResponse>>>,
    pub live_frames: RefCell<VecDeque<ChartResult<LiveFrame>>>,
    pub overlay_deltas: RefCell<VecDeque<ChartResult<OverlayDelta>>>,
    pub factor_results: RefCell<VecDeque<ChartResult<FactorSlices>>>,
    pub poll_results: RefCell<VecDeque<ChartResult<DeltaPollResponse>>>,
    pub overlay_gates: RefCell<VecDeque<oneshot::Receiver<()>>>,
    pub candle_queries: RefCell<Vec<CandlesQuery>>,
    pub delta_queries: RefCell<Vec<OverlayDeltaQuery>>,
    pub factor_queries: RefCell<Vec<FactorQuery>>,
    pub poll_queries: RefCell<Vec<DeltaPollQuery>>,
    pub live_frame_calls: Cell<usize>,
}

impl FakeSource {
    pub fn with_candles(responses: Vec<ChartResult<CandlesResponse>>) -> Self {
        let source = Self::default();
        source.candle_responses.borrow_mut().extend(responses);
        source
    }

    pub fn push_candles(&self, response: ChartResult<CandlesResponse>) {
        self.candle_responses.borrow_mut().push_back(response);
    }

    pub fn push_delta(&self, delta: ChartResult<OverlayDelta>) {
        self.overlay_deltas.borrow_mut().push_back(delta);
    }

    /// Hold the next `overlay_delta` call until the returned sender fires or drops.
    pub fn gate_next_delta(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.overlay_gates.borrow_mut().push_back(gate);
        release
    }

    pub fn delta_times(&self) -> Vec<Option<i64>> {
        self.delta_queries.borrow().iter().map(|q| q.at_time).collect()
    }
}

impl ChartDataSource for FakeSource {
    async fn candles(&self, query: &CandlesQuery) -> ChartResult<CandlesResponse> {
        self.candle_queries.borrow_mut().push(query.clone());
        self.candle_responses.borrow_mut().pop_front().unwrap_or_else(|| Ok(CandlesResponse::default()))
    }

    async fn overlay_delta(&self, query: &OverlayDeltaQuery) -> ChartResult<OverlayDelta> {
        self.delta_queries.borrow_mut().push(query.clone());
        let gate = self.overlay_gates.borrow_mut().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.overlay_deltas.borrow_mut().pop_front().unwrap_or_else(|| Ok(OverlayDelta::default()))
    }

    async fn factor_slices(&self, query: &FactorQuery) -> ChartResult<FactorSlices> {
        self.factor_queries.borrow_mut().push(query.clone());
        self.factor_results.borrow_mut().pop_front().unwrap_or_else(|| Ok(FactorSlices::default()))
    }

    async fn live_frame(&self, _query: &LiveFrameQuery) -> ChartResult<LiveFrame> {
        self.live_frame_calls.set(self.live_frame_calls.get() + 1);
        self.live_frames
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ChartError::Http { status: 404, detail: "no live frame".to_string() }))
    }

    async fn delta_poll(&self, query: &DeltaPollQuery) -> ChartResult<DeltaPollResponse> {
        self.poll_queries.borrow_mut().push(query.clone());
        self.poll_results.borrow_mut().pop_front().unwrap_or_else(|| Ok(DeltaPollResponse::default()))
    }
}

/// Push channel fed from an unbounded channel held by the test.
pub struct FakePush {
    stream: RefCell<Option<PushStream>>,
    pub subscriptions: RefCell<Vec<Option<i64>>>,
}

impl FakePush {
    pub fn channel() -> (Self, mpsc::UnboundedSender<ChartResult<PushMessage>>) {
        let (sender, receiver) = mpsc::unbounded();
        let push = Self { stream: RefCell::new(Some(receiver.boxed_local())), subscriptions: RefCell::new(Vec::new()) };
        (push, sender)
    }
}

impl PushChannel for FakePush {
    async fn subscribe(&self, _series_id: &SeriesId, since: Option<i64>) -> ChartResult<PushStream> {
        self.subscriptions.borrow_mut().push(since);
        self.stream.borrow_mut().take().ok_or_else(|| ChartError::PushChannel("already subscribed".to_string()))
    }
}

/// Timer whose sleeps complete immediately; records requested delays.
#[derive(Default)]
pub struct ImmediateTimer {
    pub sleeps: RefCell<Vec<Duration>>,
}

impl Timer for ImmediateTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        self.sleeps.borrow_mut().push(duration);
        futures::future::ready(()).boxed_local()
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub statuses: RefCell<Vec<LoadStatus>>,
    pub candles: RefCell<Vec<Arc<Vec<Candle>>>>,
    pub overlays: RefCell<Vec<(OverlayRenderModel, PenAnchorView, OverlayCounts)>>,
    pub positions: RefCell<Vec<ReplayPosition>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<LoadPhase> {
        self.statuses.borrow().iter().map(|s| s.phase).collect()
    }

    pub fn last_status(&self) -> Option<LoadStatus> {
        self.statuses.borrow().last().cloned()
    }

    pub fn last_candles(&self) -> Arc<Vec<Candle>> {
        self.candles.borrow().last().cloned().unwrap_or_default()
    }

    pub fn update_count(&self) -> usize {
        self.statuses.borrow().len() + self.candles.borrow().len() + self.overlays.borrow().len()
    }
}

impl ChartObserver for RecordingObserver {
    fn on_status(&self, status: &LoadStatus) {
        self.statuses.borrow_mut().push(status.clone());
    }

    fn on_candles(&self, candles: &Arc<Vec<Candle>>) {
        self.candles.borrow_mut().push(Arc::clone(candles));
    }

    fn on_overlays(&self, overlays: &OverlayRenderModel, pens: &PenAnchorView, counts: OverlayCounts) {
        self.overlays.borrow_mut().push((overlays.clone(), pens.clone(), counts));
    }

    fn on_replay_position(&self, position: ReplayPosition) {
        self.positions.borrow_mut().push(position);
    }
}

pub fn test_config() -> ChartConfig {
    let mut config = ChartConfig::default();
    config.live.backfill_attempts = 3;
    config.live.window_candles = 500;
    config
}

/// A live session running on a local pool, driven one step at a time.
pub struct LiveHarness {
    pub pool: LocalPool,
    pub source: Rc<FakeSource>,
    pub push: Rc<FakePush>,
    pub timer: Rc<ImmediateTimer>,
    pub observer: Rc<RecordingObserver>,
    pub sender: mpsc::UnboundedSender<ChartResult<PushMessage>>,
    pub token: SessionToken,
    outcome: Rc<RefCell<Option<ChartResult<LoadPhase>>>>,
}

impl LiveHarness {
    pub fn start(source: FakeSource, config: ChartConfig) -> Self {
        let (push, sender) = FakePush::channel();
        let source = Rc::new(source);
        let push = Rc::new(push);
        let timer = Rc::new(ImmediateTimer::default());
        let observer = Rc::new(RecordingObserver::default());

        let ports = SessionPorts {
            source: Rc::clone(&source),
            push: Rc::clone(&push),
            timer: timer.clone() as Rc<dyn Timer>,
            observer: observer.clone() as Rc<dyn ChartObserver>,
        };
        let controller = LiveSessionController::new(SeriesId::from(SERIES), Timeframe::OneMinute, &config, ports);
        let token = controller.token();

        let pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&outcome);
        pool.spawner()
            .spawn_local(async move {
                let result = controller.run().await;
                *slot.borrow_mut() = Some(result);
            })
            .expect("spawn session");

        let mut harness = Self { pool, source, push, timer, observer, sender, token, outcome };
        harness.settle();
        harness
    }

    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    pub fn send(&mut self, message: PushMessage) {
        self.sender.unbounded_send(Ok(message)).expect("session listening");
        self.settle();
    }

    pub fn send_error(&mut self, error: ChartError) {
        self.sender.unbounded_send(Err(error)).expect("session listening");
        self.settle();
    }

    pub fn outcome(&self) -> Option<ChartResult<LoadPhase>> {
        self.outcome.borrow().clone()
    }
}

/// Replay source with scripted job states and per-window fetch counting.
#[derive(Default)]
pub struct FakeReplaySource {
    pub coverage_states: RefCell<VecDeque<ChartResult<JobStatus>>>,
    pub build_states: RefCell<VecDeque<ChartResult<JobStatus>>>,
    pub windows: RefCell<HashMap<usize, ReplayWindowBundle>>,
    pub window_requests: RefCell<Vec<usize>>,
    pub window_gates: RefCell<HashMap<usize, oneshot::Receiver<()>>>,
    pub builds: RefCell<Vec<BuildRequest>>,
}

impl FakeReplaySource {
    pub fn gate_window(&self, target_idx: usize) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.window_gates.borrow_mut().insert(target_idx, gate);
        release
    }

    pub fn requests_for(&self, target_idx: usize) -> usize {
        self.window_requests.borrow().iter().filter(|&&idx| idx == target_idx).count()
    }
}

impl ReplaySource for FakeReplaySource {
    async fn build(&self, request: &BuildRequest) -> ChartResult<JobTicket> {
        self.builds.borrow_mut().push(request.clone());
        Ok(JobTicket { job_id: "build-1".to_string() })
    }

    async fn status(&self, _job_id: &str) -> ChartResult<JobStatus> {
        self.build_states
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ChartError::Replay("no build state scripted".to_string())))
    }

    async fn ensure_coverage(&self, _request: &CoverageRequest) -> ChartResult<JobTicket> {
        Ok(JobTicket { job_id: "coverage-1".to_string() })
    }

    async fn coverage_status(&self, _job_id: &str) -> ChartResult<JobStatus> {
        self.coverage_states
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ChartError::Replay("no coverage state scripted".to_string())))
    }

    async fn window(&self, _job_id: &str, target_idx: usize) -> ChartResult<ReplayWindowBundle> {
        self.window_requests.borrow_mut().push(target_idx);
        let gate = self.window_gates.borrow_mut().remove(&target_idx);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.windows
            .borrow()
            .get(&target_idx)
            .cloned()
            .ok_or_else(|| ChartError::Http { status: 404, detail: format!("window {}", target_idx) })
    }
}
