use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::logging::LogComponent;
use crate::log_debug;

pub const PIVOT: &str = "pivot";
pub const PEN: &str = "pen";
pub const ZHONGSHU: &str = "zhongshu";
pub const ANCHOR: &str = "anchor";

/// Latest state plus append-only history of one factor at one evaluation time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorSnapshot {
    #[serde(default)]
    pub head: Value,
    #[serde(default)]
    pub history: Value,
    #[serde(default)]
    pub meta: Value,
}

/// Response of `factor_slices`: snapshots of every factor at one candle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorSlices {
    /// `"<series_id>:<candle_time>"`.
    #[serde(default)]
    pub candle_id: Option<String>,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub snapshots: BTreeMap<String, FactorSnapshot>,
}

/// A pen as stored in factor history and heads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenRecord {
    pub start_time: i64,
    pub end_time: i64,
    pub start_price: f64,
    pub end_price: f64,
    #[serde(default)]
    pub direction: i8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PenHistory {
    #[serde(default)]
    pub confirmed: Vec<PenRecord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PenHead {
    #[serde(default)]
    pub extending: Option<PenRecord>,
    #[serde(default)]
    pub candidate: Option<PenRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorRefKind {
    Confirmed,
    Candidate,
}

/// Which pen the anchor currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRef {
    pub kind: AnchorRefKind,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub direction: i8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnchorHead {
    #[serde(default)]
    pub current_anchor_ref: Option<AnchorRef>,
}

impl FactorSlices {
    /// Candle time the slices were evaluated at, parsed from `candle_id`.
    pub fn candle_time(&self) -> Option<i64> {
        let id = self.candle_id.as_deref()?;
        id.rsplit(':').next()?.parse().ok()
    }

    pub fn snapshot(&self, factor: &str) -> Option<&FactorSnapshot> {
        self.snapshots.get(factor)
    }

    pub fn pen_history(&self) -> PenHistory {
        self.read(PEN, |s| &s.history)
    }

    pub fn pen_head(&self) -> PenHead {
        self.read(PEN, |s| &s.head)
    }

    pub fn anchor_head(&self) -> AnchorHead {
        self.read(ANCHOR, |s| &s.head)
    }

    /// Typed view of one part of a snapshot. Missing or malformed parts read as empty.
    fn read<T, F>(&self, factor: &str, part: F) -> T
    where
        T: DeserializeOwned + Default,
        F: Fn(&FactorSnapshot) -> &Value,
    {
        let Some(value) = self.snapshots.get(factor).map(part) else {
            return T::default();
        };
        if value.is_null() {
            return T::default();
        }
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_debug!(LogComponent::Domain("FactorSlices"), "unreadable {} snapshot: {}", factor, e);
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candle_time_comes_from_candle_id() {
        let slices = FactorSlices { candle_id: Some("binance:spot:BTCUSDT:1m:1700000060".into()), ..Default::default() };
        assert_eq!(slices.candle_time(), Some(1_700_000_060));
        assert_eq!(FactorSlices::default().candle_time(), None);
    }

    #[test]
    fn typed_readers_tolerate_missing_and_malformed_parts() {
        let mut slices = FactorSlices::default();
        assert_eq!(slices.pen_history(), PenHistory::default());

        slices.snapshots.insert(
            PEN.into(),
            FactorSnapshot {
                head: json!({"candidate": "not a pen"}),
                history: json!({"confirmed": [{"start_time": 60, "end_time": 120, "start_price": 1.0, "end_price": 2.0}]}),
                meta: Value::Null,
            },
        );
        assert_eq!(slices.pen_history().confirmed.len(), 1);
        assert_eq!(slices.pen_head(), PenHead::default());
    }
}
