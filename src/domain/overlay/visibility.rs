use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MAX_DEPTH: usize = 16;

/// Effective visibility of a feature key.
///
/// An explicit override wins; otherwise the key inherits from its parent,
/// taken from `parents` or, failing that, the dotted prefix (`pen.confirmed`
/// inherits from `pen`). Keys nobody mentions are visible.
pub fn resolve_visible(key: &str, parents: &HashMap<String, String>, overrides: &HashMap<String, bool>) -> bool {
    let mut current = key.to_string();
    for _ in 0..MAX_DEPTH {
        if let Some(&visible) = overrides.get(&current) {
            return visible;
        }
        let parent = match parents.get(&current) {
            Some(parent) => parent.clone(),
            None => match current.rsplit_once('.') {
                Some((prefix, _)) => prefix.to_string(),
                None => return true,
            },
        };
        if parent == current {
            return true;
        }
        current = parent;
    }
    true
}

/// Per-feature visibility flags supplied by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisibilityFlags {
    #[serde(default)]
    pub overrides: HashMap<String, bool>,
    #[serde(default)]
    pub parents: HashMap<String, String>,
}

impl VisibilityFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, key: &str, visible: bool) -> Self {
        self.overrides.insert(key.to_string(), visible);
        self
    }

    pub fn with_parent(mut self, child: &str, parent: &str) -> Self {
        self.parents.insert(child.to_string(), parent.to_string());
        self
    }

    pub fn is_visible(&self, key: &str) -> bool {
        resolve_visible(key, &self.parents, &self.overrides)
    }
}
