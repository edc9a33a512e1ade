use std::collections::{BTreeMap, BTreeSet};

use super::instruction::{Cursor, OverlayDelta, OverlayInstruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    Empty,
    Synced,
}

/// What one delta application changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub patched: usize,
    pub cursor_advanced: bool,
}

/// Versioned instruction catalog of one series plus its active-id subset.
#[derive(Debug, Clone)]
pub struct OverlayCatalog {
    entries: BTreeMap<String, OverlayInstruction>,
    active_ids: BTreeSet<String>,
    cursor: Cursor,
    state: CatalogState,
    revision: u64,
}

impl Default for OverlayCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayCatalog {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            active_ids: BTreeSet::new(),
            cursor: Cursor::RESYNC,
            state: CatalogState::Empty,
            revision: 0,
        }
    }

    /// Apply a delta. Patch entries overwrite by id in array order, the
    /// active set is replaced wholesale and the cursor never moves backwards.
    ///
    /// A resync delta is safe on a populated catalog: the map only grows and
    /// the active set is authoritative either way.
    pub fn apply(&mut self, delta: &OverlayDelta) -> DeltaOutcome {
        for instruction in &delta.instruction_catalog_patch {
            self.entries.insert(instruction.instruction_id.clone(), instruction.clone());
        }

        self.active_ids = delta.active_ids.iter().cloned().collect();

        let previous = self.cursor;
        self.cursor = previous.max(delta.next_cursor);
        self.state = CatalogState::Synced;
        self.revision += 1;

        DeltaOutcome {
            patched: delta.instruction_catalog_patch.len(),
            cursor_advanced: self.cursor > previous,
        }
    }

    /// Drop everything, including the cursor, so the next fetch is a full resync.
    pub fn reset(&mut self) {
        *self = Self { revision: self.revision + 1, ..Self::new() };
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn state(&self) -> CatalogState {
        self.state
    }

    /// Bumped on every mutation; derived views rebuild when it moves.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn entries(&self) -> &BTreeMap<String, OverlayInstruction> {
        &self.entries
    }

    pub fn active_ids(&self) -> &BTreeSet<String> {
        &self.active_ids
    }

    pub fn get(&self, instruction_id: &str) -> Option<&OverlayInstruction> {
        self.entries.get(instruction_id)
    }

    pub fn is_active(&self, instruction_id: &str) -> bool {
        self.active_ids.contains(instruction_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
