use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::factor_log::ReplayFactorPack;
use crate::domain::market_data::Candle;
use crate::domain::overlay::OverlayInstruction;

/// Full active-id set at `at_idx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCheckpoint {
    pub at_idx: usize,
    #[serde(default)]
    pub active_ids: Vec<String>,
}

/// Activity change at `at_idx`: adds are applied before removes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDiff {
    pub at_idx: usize,
    #[serde(default)]
    pub add_ids: Vec<String>,
    #[serde(default)]
    pub remove_ids: Vec<String>,
}

impl ActiveDiff {
    fn apply_to(&self, active: &mut BTreeSet<String>) {
        active.extend(self.add_ids.iter().cloned());
        for id in &self.remove_ids {
            active.remove(id);
        }
    }
}

/// One fixed-size slice of a replay package. Indices are global bar indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayWindow {
    pub window_index: usize,
    pub start_idx: usize,
    pub end_idx: usize,
    #[serde(default)]
    pub kline: Vec<Candle>,
    #[serde(default)]
    pub draw_catalog_base: Vec<OverlayInstruction>,
    #[serde(default)]
    pub draw_catalog_patch: Vec<OverlayInstruction>,
    #[serde(default)]
    pub draw_active_checkpoints: Vec<ActiveCheckpoint>,
    #[serde(default)]
    pub draw_active_diffs: Vec<ActiveDiff>,
}

impl ReplayWindow {
    /// Sort the activity log by index. Stable, so same-index entries keep server order.
    pub fn normalized(mut self) -> Self {
        self.draw_active_checkpoints.sort_by_key(|c| c.at_idx);
        self.draw_active_diffs.sort_by_key(|d| d.at_idx);
        self
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.start_idx && idx <= self.end_idx
    }

    pub fn candle_at(&self, idx: usize) -> Option<&Candle> {
        idx.checked_sub(self.start_idx).and_then(|local| self.kline.get(local))
    }

    /// Bars of this window up to and including `idx`.
    pub fn candles_through(&self, idx: usize) -> &[Candle] {
        match idx.checked_sub(self.start_idx) {
            Some(local) => &self.kline[..(local + 1).min(self.kline.len())],
            None => &[],
        }
    }

    /// Exact active-id set at `target_idx`: nearest checkpoint at or before the
    /// target, then every diff after that checkpoint up to the target.
    ///
    /// Depends only on `(self, target_idx)`, never on how the caller got there.
    pub fn active_ids_at(&self, target_idx: usize) -> BTreeSet<String> {
        let checkpoints = &self.draw_active_checkpoints;
        let found = checkpoints.partition_point(|c| c.at_idx <= target_idx);

        let (mut active, first_diff) = match found.checked_sub(1).map(|i| &checkpoints[i]) {
            Some(checkpoint) => {
                let seed: BTreeSet<String> = checkpoint.active_ids.iter().cloned().collect();
                (seed, self.draw_active_diffs.partition_point(|d| d.at_idx <= checkpoint.at_idx))
            }
            None => (BTreeSet::new(), 0),
        };

        for diff in self.draw_active_diffs[first_diff..].iter().take_while(|d| d.at_idx <= target_idx) {
            diff.apply_to(&mut active);
        }
        active
    }

    /// Base and patch entries ordered by `(version_id, visible_time)`; the
    /// last entry per id wins.
    pub fn merged_catalog(&self) -> BTreeMap<String, OverlayInstruction> {
        let mut entries: Vec<&OverlayInstruction> =
            self.draw_catalog_base.iter().chain(self.draw_catalog_patch.iter()).collect();
        entries.sort_by_key(|i| (i.version_id, i.visible_time));

        let mut catalog = BTreeMap::new();
        for instruction in entries {
            catalog.insert(instruction.instruction_id.clone(), instruction.clone());
        }
        catalog
    }
}

/// Reference reconstruction that ignores checkpoints and replays the whole
/// diff log from the start.
pub fn active_ids_by_full_replay(diffs: &[ActiveDiff], target_idx: usize) -> BTreeSet<String> {
    let mut active = BTreeSet::new();
    for diff in diffs.iter().filter(|d| d.at_idx <= target_idx) {
        diff.apply_to(&mut active);
    }
    active
}

/// A window as served by the `window` endpoint, with its factor history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayWindowBundle {
    pub window: ReplayWindow,
    #[serde(default)]
    pub factor_snapshots: ReplayFactorPack,
}
