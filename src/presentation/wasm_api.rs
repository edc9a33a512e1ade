use futures::future::{AbortHandle, Abortable};
use futures::lock::Mutex;
use gloo::utils::format::JsValueSerdeExt;
use js_sys::Promise;
use std::rc::Rc;
use std::str::FromStr;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::application::config::ChartConfig;
use crate::application::replay_engine::{ReplayPorts, ReplayWindowEngine};
use crate::application::session::{LiveSessionController, SessionPorts, SessionToken};
use crate::domain::errors::ChartError;
use crate::domain::logging::LogComponent;
use crate::domain::market_data::{SeriesId, Timeframe};
use crate::infrastructure::http::HttpChartSource;
use crate::infrastructure::services::{BrowserSpawner, GlooTimer};
use crate::infrastructure::websocket::WsPushChannel;
use crate::presentation::signals::SignalObserver;
use crate::{log_debug, log_info, log_warn};

const COMPONENT: LogComponent = LogComponent::Presentation("ChartSessionApi");

struct LiveHandle {
    token: SessionToken,
    abort: AbortHandle,
}

impl LiveHandle {
    fn stop(self) {
        self.token.cancel();
        self.abort.abort();
    }
}

struct ReplayHandle {
    token: SessionToken,
    engine: Rc<Mutex<ReplayWindowEngine<HttpChartSource>>>,
}

/// JavaScript entry point: one live session and at most one replay at a time.
///
/// Output is published through the global signals, not return values.
#[wasm_bindgen]
pub struct ChartSessionApi {
    config: ChartConfig,
    source: Rc<HttpChartSource>,
    push: Rc<WsPushChannel>,
    live: Option<LiveHandle>,
    replay: Option<ReplayHandle>,
}

#[wasm_bindgen]
impl ChartSessionApi {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<ChartSessionApi, JsValue> {
        let config = ChartConfig::from_json(config_json.as_deref().unwrap_or_default()).map_err(to_js)?;
        Ok(Self {
            source: Rc::new(HttpChartSource::new(&config.api)),
            push: Rc::new(WsPushChannel::new(config.api.ws_url.clone())),
            config,
            live: None,
            replay: None,
        })
    }

    /// Tear down the current live session and start one for `series_id`.
    #[wasm_bindgen(js_name = selectSeries)]
    pub fn select_series(&mut self, series_id: String, timeframe: String) -> Result<(), JsValue> {
        let series_id = SeriesId::new(series_id).map_err(|e| JsValue::from_str(&e))?;
        let timeframe = Timeframe::from_str(&timeframe)
            .map_err(|_| JsValue::from_str(&format!("unknown timeframe: {}", timeframe)))?;
        self.stop_live();

        let ports = SessionPorts {
            source: Rc::clone(&self.source),
            push: Rc::clone(&self.push),
            timer: Rc::new(GlooTimer),
            observer: Rc::new(SignalObserver),
        };
        let controller = LiveSessionController::new(series_id.clone(), timeframe, &self.config, ports);
        let (abort, registration) = AbortHandle::new_pair();
        self.live = Some(LiveHandle { token: controller.token(), abort });

        spawn_local(async move {
            match Abortable::new(controller.run(), registration).await {
                Ok(Ok(phase)) => log_info!(COMPONENT, "Session {} ended in {}", series_id, phase),
                Ok(Err(err)) => log_warn!(COMPONENT, "Session {} ended: {}", series_id, err),
                Err(_) => log_debug!(COMPONENT, "Session {} aborted", series_id),
            }
        });
        Ok(())
    }

    /// Build (or reuse) the replay package for `series_id`; resolves to its metadata.
    #[wasm_bindgen(js_name = startReplay)]
    pub fn start_replay(&mut self, series_id: String) -> Result<Promise, JsValue> {
        let series_id = SeriesId::new(series_id).map_err(|e| JsValue::from_str(&e))?;
        self.stop_replay();

        let ports = ReplayPorts {
            source: Rc::clone(&self.source),
            timer: Rc::new(GlooTimer),
            observer: Rc::new(SignalObserver),
            spawner: Rc::new(BrowserSpawner),
        };
        let engine = ReplayWindowEngine::new(series_id, &self.config, ports);
        let token = engine.token();
        let engine = Rc::new(Mutex::new(engine));
        self.replay = Some(ReplayHandle { token, engine: Rc::clone(&engine) });

        Ok(future_to_promise(async move {
            let metadata = engine.lock().await.prepare().await.map_err(to_js)?;
            JsValue::from_serde(&metadata).map_err(|e| JsValue::from_str(&e.to_string()))
        }))
    }

    /// Move the replay cursor; resolves to the published position.
    #[wasm_bindgen(js_name = seekReplay)]
    pub fn seek_replay(&self, index: usize) -> Result<Promise, JsValue> {
        let Some(handle) = &self.replay else {
            return Err(JsValue::from_str("replay not started"));
        };
        let engine = Rc::clone(&handle.engine);
        Ok(future_to_promise(async move {
            let frame = engine.lock().await.seek(index).await.map_err(to_js)?;
            JsValue::from_serde(&frame.position).map_err(|e| JsValue::from_str(&e.to_string()))
        }))
    }

    #[wasm_bindgen(js_name = replayTotal)]
    pub fn replay_total(&self) -> usize {
        self.replay
            .as_ref()
            .and_then(|handle| handle.engine.try_lock().map(|engine| engine.total()))
            .unwrap_or(0)
    }

    #[wasm_bindgen(js_name = stopReplay)]
    pub fn stop_replay(&mut self) {
        if let Some(handle) = self.replay.take() {
            handle.token.cancel();
            if let Some(mut engine) = handle.engine.try_lock() {
                engine.stop();
            }
        }
    }

    pub fn stop(&mut self) {
        self.stop_live();
        self.stop_replay();
    }
}

impl ChartSessionApi {
    /// Token of the running live session, if any.
    pub fn live_token(&self) -> Option<SessionToken> {
        self.live.as_ref().map(|handle| handle.token.clone())
    }

    fn stop_live(&mut self) {
        if let Some(handle) = self.live.take() {
            handle.stop();
        }
    }
}

fn to_js(err: ChartError) -> JsValue {
    JsValue::from_str(&err.to_string())
}
