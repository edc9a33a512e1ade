use futures::{SinkExt, StreamExt, future};
use gloo_net::websocket::{Message, futures::WebSocket};

use crate::domain::errors::{ChartError, ChartResult};
use crate::domain::logging::LogComponent;
use crate::domain::market_data::SeriesId;
use crate::domain::repositories::{PushChannel, PushStream};
use crate::infrastructure::websocket::dto::{SubscribeRequest, decode_push, resolve_ws_url};
use crate::{log_info, log_warn};

const COMPONENT: LogComponent = LogComponent::Infrastructure("PushWS");

/// Push channel over a browser WebSocket (gloo-net).
///
/// One socket per subscription. Malformed frames are logged and skipped;
/// a socket error ends the session with `PushChannel`.
#[derive(Debug, Clone)]
pub struct WsPushChannel {
    ws_url: String,
}

impl WsPushChannel {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    fn socket_url(&self) -> String {
        let origin = gloo::utils::window().location().origin().ok();
        resolve_ws_url(&self.ws_url, origin.as_deref())
    }
}

impl PushChannel for WsPushChannel {
    async fn subscribe(&self, series_id: &SeriesId, since: Option<i64>) -> ChartResult<PushStream> {
        let url = self.socket_url();
        log_info!(COMPONENT, "Connecting {} for {}", url, series_id);

        let mut socket =
            WebSocket::open(&url).map_err(|e| ChartError::PushChannel(format!("open {}: {}", url, e)))?;
        let frame = SubscribeRequest::new(series_id, since).to_json()?;
        socket
            .send(Message::Text(frame))
            .await
            .map_err(|e| ChartError::PushChannel(format!("subscribe: {}", e)))?;

        let stream = socket.filter_map(|message| {
            let item = match message {
                Ok(Message::Text(text)) => match decode_push(&text) {
                    Ok(push) => Some(Ok(push)),
                    Err(err) => {
                        log_warn!(COMPONENT, "Skipping malformed frame: {}", err);
                        None
                    }
                },
                Ok(Message::Bytes(_)) => None,
                Err(err) => Some(Err(ChartError::PushChannel(err.to_string()))),
            };
            future::ready(item)
        });
        Ok(stream.boxed_local())
    }
}
