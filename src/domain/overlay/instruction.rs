use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Drawable shape of an overlay instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Marker,
    Polyline,
}

/// One vertex of a polyline, in chart coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinePoint {
    pub time: i64,
    pub value: f64,
}

impl LinePoint {
    pub fn new(time: i64, value: f64) -> Self {
        Self { time, value }
    }
}

/// Payload of an instruction. Only the fields the client interprets are typed;
/// everything else rides along in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstructionDefinition {
    /// Dotted feature tag, e.g. `pivot.major`, `pen.confirmed`, `anchor.switch`.
    #[serde(default)]
    pub feature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<LinePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_style: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InstructionDefinition {
    /// Leading segment of the feature tag (`pivot` for `pivot.major`).
    pub fn family(&self) -> &str {
        feature_family(&self.feature)
    }
}

pub fn feature_family(feature: &str) -> &str {
    feature.split('.').next().unwrap_or(feature)
}

/// Catalog entry. Entries are only ever added or replaced; visibility is
/// driven by the active-id set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayInstruction {
    pub instruction_id: String,
    pub version_id: i64,
    pub kind: InstructionKind,
    pub visible_time: i64,
    #[serde(default)]
    pub definition: InstructionDefinition,
}

impl OverlayInstruction {
    pub fn feature(&self) -> &str {
        &self.definition.feature
    }

    /// Trendline families may project outside the viewport.
    pub fn is_anchor_family(&self) -> bool {
        self.definition.family() == "anchor"
    }
}

/// Client bookmark into the server's overlay version stream. `0` requests a full resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub version_id: i64,
}

impl Cursor {
    pub const RESYNC: Cursor = Cursor { version_id: 0 };

    pub fn new(version_id: i64) -> Self {
        Self { version_id }
    }

    pub fn is_resync(&self) -> bool {
        self.version_id == 0
    }
}

/// Incremental catalog update as served by `overlay_delta` and embedded in
/// `live_frame` / `delta_poll` responses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverlayDelta {
    #[serde(default)]
    pub active_ids: Vec<String>,
    #[serde(default, alias = "catalog_patch")]
    pub instruction_catalog_patch: Vec<OverlayInstruction>,
    #[serde(default)]
    pub next_cursor: Cursor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_keeps_unknown_fields() {
        let raw = r##"{
            "instruction_id": "pivot:1",
            "version_id": 3,
            "kind": "marker",
            "visible_time": 120,
            "definition": {"feature": "pivot.major", "time": 60, "color": "#f00", "level": 2}
        }"##;
        let instruction: OverlayInstruction = serde_json::from_str(raw).unwrap();
        assert_eq!(instruction.kind, InstructionKind::Marker);
        assert_eq!(instruction.definition.family(), "pivot");
        assert_eq!(instruction.definition.extra.get("level"), Some(&Value::from(2)));
    }

    #[test]
    fn delta_accepts_short_patch_name() {
        let raw = r#"{"active_ids":["a"],"catalog_patch":[],"next_cursor":{"version_id":4}}"#;
        let delta: OverlayDelta = serde_json::from_str(raw).unwrap();
        assert_eq!(delta.next_cursor, Cursor::new(4));
    }

    #[test]
    fn anchor_family_detection() {
        assert_eq!(feature_family("anchor.current"), "anchor");
        assert_eq!(feature_family("pen"), "pen");
    }
}
