use serde::{Deserialize, Serialize};

use crate::domain::errors::{ChartError, ChartResult};
use crate::domain::events::PushMessage;
use crate::domain::market_data::SeriesId;

/// First frame sent after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub series_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

impl SubscribeRequest {
    pub fn new(series_id: &SeriesId, since: Option<i64>) -> Self {
        Self { kind: "subscribe".to_string(), series_id: series_id.value().to_string(), since }
    }

    pub fn to_json(&self) -> ChartResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode one text frame into a push message.
pub fn decode_push(text: &str) -> ChartResult<PushMessage> {
    serde_json::from_str(text).map_err(|e| ChartError::Decode(format!("push frame: {}", e)))
}

/// Absolute socket URL for `ws_url`, resolved against the page origin when relative.
pub fn resolve_ws_url(ws_url: &str, origin: Option<&str>) -> String {
    if ws_url.starts_with("ws://") || ws_url.starts_with("wss://") {
        return ws_url.to_string();
    }
    let Some(origin) = origin else {
        return ws_url.to_string();
    };
    let origin = origin.trim_end_matches('/');
    let socket_origin = if let Some(host) = origin.strip_prefix("https://") {
        format!("wss://{}", host)
    } else if let Some(host) = origin.strip_prefix("http://") {
        format!("ws://{}", host)
    } else {
        origin.to_string()
    };
    format!("{}/{}", socket_origin, ws_url.trim_start_matches('/'))
}
