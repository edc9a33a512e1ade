use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::instruction::{InstructionKind, LinePoint, OverlayInstruction};
use super::visibility::VisibilityFlags;
use crate::domain::market_data::TimeRange;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerView {
    pub id: String,
    pub feature: String,
    pub time: i64,
    pub position: Option<String>,
    pub shape: Option<String>,
    pub color: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolylineView {
    pub id: String,
    pub feature: String,
    pub points: Vec<LinePoint>,
    pub color: Option<String>,
    pub line_width: Option<f64>,
    pub line_style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZhongshuRect {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub top: f64,
    pub bottom: f64,
    pub color: Option<String>,
}

/// Element counts published to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OverlayCounts {
    pub pivots: usize,
    pub pens: usize,
    pub zhongshu: usize,
    pub anchors: usize,
}

/// Renderer-facing views derived from the active catalog subset.
///
/// Always rebuilt from scratch; the same inputs give identical output.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OverlayRenderModel {
    pub pivot_markers: Vec<MarkerView>,
    pub anchor_switch_markers: Vec<MarkerView>,
    pub markers: Vec<MarkerView>,
    pub pen_points: Vec<LinePoint>,
    pub pen_segments: usize,
    pub zhongshu_rects: Vec<ZhongshuRect>,
    pub polylines: Vec<PolylineView>,
}

impl OverlayRenderModel {
    pub fn rebuild(
        active_ids: &BTreeSet<String>,
        catalog: &BTreeMap<String, OverlayInstruction>,
        range: Option<TimeRange>,
        visibility: &VisibilityFlags,
    ) -> Self {
        let mut model = Self::default();
        let Some(range) = range else {
            return model;
        };

        let mut pen_lines: Vec<(i64, &str, Vec<LinePoint>)> = Vec::new();

        for instruction in active_ids.iter().filter_map(|id| catalog.get(id)) {
            let feature = instruction.feature();
            if !visibility.is_visible(feature) {
                continue;
            }

            match instruction.kind {
                InstructionKind::Marker => {
                    let time = instruction.definition.time.unwrap_or(instruction.visible_time);
                    if !range.contains(time) {
                        continue;
                    }
                    let view = marker_view(instruction, time);
                    match (instruction.definition.family(), feature) {
                        ("pivot", _) => model.pivot_markers.push(view),
                        (_, "anchor.switch") => model.anchor_switch_markers.push(view),
                        _ => model.markers.push(view),
                    }
                }
                InstructionKind::Polyline => {
                    let Some(points) = clip_points(instruction, range) else {
                        continue;
                    };
                    match instruction.definition.family() {
                        "pen" => pen_lines.push((points[0].time, instruction.instruction_id.as_str(), points)),
                        "zhongshu" => model.zhongshu_rects.push(zhongshu_rect(instruction, &points)),
                        _ => model.polylines.push(polyline_view(instruction, points)),
                    }
                }
            }
        }

        pen_lines.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        model.pen_segments = pen_lines.len();
        for (_, _, points) in pen_lines {
            for point in points {
                if model.pen_points.last() != Some(&point) {
                    model.pen_points.push(point);
                }
            }
        }

        model.pivot_markers.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        model.anchor_switch_markers.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        model.markers.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        model.zhongshu_rects.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));

        model
    }

    pub fn counts(&self) -> OverlayCounts {
        let anchor_lines = self.polylines.iter().filter(|p| p.feature.starts_with("anchor")).count();
        OverlayCounts {
            pivots: self.pivot_markers.len(),
            pens: self.pen_segments,
            zhongshu: self.zhongshu_rects.len(),
            anchors: anchor_lines + self.anchor_switch_markers.len(),
        }
    }
}

/// Markers need an in-range time. Polylines need two in-range points after
/// clipping, except the anchor family which is kept whole so trendlines can
/// run past the viewport edges.
fn clip_points(instruction: &OverlayInstruction, range: TimeRange) -> Option<Vec<LinePoint>> {
    let points = &instruction.definition.points;
    let kept: Vec<LinePoint> = if instruction.is_anchor_family() {
        points.clone()
    } else {
        points.iter().copied().filter(|p| range.contains(p.time)).collect()
    };
    (kept.len() >= 2).then_some(kept)
}

fn marker_view(instruction: &OverlayInstruction, time: i64) -> MarkerView {
    let def = &instruction.definition;
    MarkerView {
        id: instruction.instruction_id.clone(),
        feature: def.feature.clone(),
        time,
        position: def.position.clone(),
        shape: def.shape.clone(),
        color: def.color.clone(),
        text: def.text.clone(),
    }
}

fn polyline_view(instruction: &OverlayInstruction, points: Vec<LinePoint>) -> PolylineView {
    let def = &instruction.definition;
    PolylineView {
        id: instruction.instruction_id.clone(),
        feature: def.feature.clone(),
        points,
        color: def.color.clone(),
        line_width: def.line_width,
        line_style: def.line_style.clone(),
    }
}

fn zhongshu_rect(instruction: &OverlayInstruction, points: &[LinePoint]) -> ZhongshuRect {
    let start_time = points.iter().map(|p| p.time).min().unwrap_or_default();
    let end_time = points.iter().map(|p| p.time).max().unwrap_or_default();
    let top = points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
    let bottom = points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
    ZhongshuRect {
        id: instruction.instruction_id.clone(),
        start_time,
        end_time,
        top,
        bottom,
        color: instruction.definition.color.clone(),
    }
}
