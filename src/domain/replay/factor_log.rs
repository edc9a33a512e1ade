use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::domain::factor::{FactorSlices, FactorSnapshot};

/// One append-only history event of a factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorHistoryEvent {
    pub event_id: i64,
    pub factor_name: String,
    /// History list the payload belongs to, e.g. `confirmed`.
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Factor history of a replay window: an `event_id`-ordered log, the last
/// event id visible at each candle time, and head snapshots per candle time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplayFactorPack {
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub history_events: Vec<FactorHistoryEvent>,
    #[serde(default)]
    pub event_cutoffs: BTreeMap<i64, i64>,
    #[serde(default)]
    pub head_snapshots: BTreeMap<i64, BTreeMap<String, Value>>,
}

impl ReplayFactorPack {
    pub fn normalized(mut self) -> Self {
        self.history_events.sort_by_key(|e| e.event_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.history_events.is_empty() && self.head_snapshots.is_empty()
    }

    /// Last event id visible at `time`, if any.
    pub fn cutoff_at(&self, time: i64) -> Option<i64> {
        self.event_cutoffs.range(..=time).next_back().map(|(_, id)| *id)
    }

    /// Rebuild the factor slices the live path would have served at `time`.
    pub fn slices_at(&self, series_id: &str, time: i64) -> FactorSlices {
        let visible = match self.cutoff_at(time) {
            Some(cutoff) => self.history_events.partition_point(|e| e.event_id <= cutoff),
            None => 0,
        };

        let mut histories: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for event in &self.history_events[..visible] {
            let lists = histories.entry(event.factor_name.clone()).or_default();
            if let Value::Array(list) = lists.entry(event.kind.clone()).or_insert_with(|| Value::Array(Vec::new())) {
                list.push(event.payload.clone());
            }
        }

        let heads = self.head_snapshots.range(..=time).next_back().map(|(_, heads)| heads);

        let mut names: Vec<String> = self.factors.clone();
        for name in histories.keys().chain(heads.into_iter().flat_map(|h| h.keys())) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        let snapshots = names
            .iter()
            .map(|name| {
                let snapshot = FactorSnapshot {
                    head: heads.and_then(|h| h.get(name)).cloned().unwrap_or(Value::Null),
                    history: histories.get(name).cloned().map(Value::Object).unwrap_or(Value::Null),
                    meta: json!({ "at_time": time }),
                };
                (name.clone(), snapshot)
            })
            .collect();

        FactorSlices { candle_id: Some(format!("{}:{}", series_id, time)), factors: names, snapshots }
    }
}
