use serde::{Deserialize, Serialize};

use crate::domain::market_data::Candle;

/// Messages delivered by the push channel after `subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Closed bars replayed since the subscription boundary, oldest first.
    CandlesBatch {
        #[serde(default)]
        candles: Vec<Candle>,
    },
    /// Update of the still-open tip bar.
    CandleForming { candle: Candle },
    CandleClosed { candle: Candle },
    /// The server skipped bars; local state must be resynced.
    Gap {
        #[serde(default)]
        expected_next_time: Option<i64>,
        #[serde(default)]
        actual_time: Option<i64>,
    },
    System {
        #[serde(default)]
        event: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl PushMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::CandlesBatch { .. } => "candles_batch",
            PushMessage::CandleForming { .. } => "candle_forming",
            PushMessage::CandleClosed { .. } => "candle_closed",
            PushMessage::Gap { .. } => "gap",
            PushMessage::System { .. } => "system",
        }
    }
}
