use serde::Serialize;
use std::collections::HashSet;

use super::snapshot::{AnchorRefKind, FactorSlices, PenRecord};
use crate::domain::market_data::{Candle, TimeRange};
use crate::domain::overlay::LinePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartMode {
    Live,
    Replay,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenSegment {
    pub key: String,
    pub points: [LinePoint; 2],
    pub highlighted: bool,
}

impl PenSegment {
    fn from_record(record: &PenRecord) -> Self {
        Self {
            key: pen_key(record.start_time, record.end_time),
            points: [
                LinePoint::new(record.start_time, record.start_price),
                LinePoint::new(record.end_time, record.end_price),
            ],
            highlighted: false,
        }
    }
}

pub fn pen_key(start_time: i64, end_time: i64) -> String {
    format!("pen:{}:{}", start_time, end_time)
}

/// The emphasized anchor pen. One variant at a time by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum AnchorHighlight {
    None,
    /// Solid: a confirmed pen in `pen_segments` carries `highlighted = true`.
    Confirmed { key: String },
    /// Dashed: the candidate head pen.
    Candidate { segment: PenSegment },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    Extending,
    Candidate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewSegment {
    pub kind: PreviewKind,
    pub segment: PenSegment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenAnchorView {
    pub pen_segments: Vec<PenSegment>,
    /// Continuous polyline through the segments; shared endpoints appear once.
    pub pen_points: Vec<LinePoint>,
    pub anchor_highlight: AnchorHighlight,
    pub preview_segments: Vec<PreviewSegment>,
}

impl Default for PenAnchorView {
    fn default() -> Self {
        Self {
            pen_segments: Vec::new(),
            pen_points: Vec::new(),
            anchor_highlight: AnchorHighlight::None,
            preview_segments: Vec::new(),
        }
    }
}

/// Turn factor snapshots into renderable pen and anchor data.
///
/// Shared by the live and replay paths. `segment_cap` only bounds what is drawn.
pub fn derive(
    slices: Option<&FactorSlices>,
    candles: &[Candle],
    mode: ChartMode,
    segment_cap: usize,
) -> PenAnchorView {
    let (Some(slices), Some(first), Some(last)) = (slices, candles.first(), candles.last()) else {
        return PenAnchorView::default();
    };
    let range = TimeRange::new(first.time, last.time);

    let history = slices.pen_history();
    let head = slices.pen_head();
    let anchor_ref = slices.anchor_head().current_anchor_ref;

    let mut segments: Vec<PenSegment> = history
        .confirmed
        .iter()
        .filter(|pen| range.contains(pen.start_time) && range.contains(pen.end_time))
        .map(PenSegment::from_record)
        .collect();
    if segments.len() > segment_cap {
        segments.drain(..segments.len() - segment_cap);
    }

    let anchor_highlight = match anchor_ref {
        Some(r) if r.kind == AnchorRefKind::Confirmed => {
            let key = pen_key(r.start_time, r.end_time);
            match segments.iter_mut().find(|s| s.key == key) {
                Some(segment) => {
                    segment.highlighted = true;
                    AnchorHighlight::Confirmed { key }
                }
                None => AnchorHighlight::None,
            }
        }
        Some(r) => match head.candidate {
            Some(candidate)
                if candidate.start_time == r.start_time
                    && range.contains(candidate.start_time)
                    && range.contains(candidate.end_time) =>
            {
                AnchorHighlight::Candidate { segment: PenSegment::from_record(&candidate) }
            }
            _ => AnchorHighlight::None,
        },
        None => AnchorHighlight::None,
    };

    let mut pen_points: Vec<LinePoint> = Vec::with_capacity(segments.len() + 1);
    for segment in &segments {
        for point in segment.points {
            if pen_points.last() != Some(&point) {
                pen_points.push(point);
            }
        }
    }

    let preview_segments = match mode {
        ChartMode::Live => Vec::new(),
        ChartMode::Replay => {
            let known: HashSet<i64> = candles.iter().map(|c| c.time).collect();
            [(PreviewKind::Extending, head.extending), (PreviewKind::Candidate, head.candidate)]
                .into_iter()
                .filter_map(|(kind, pen)| pen.map(|p| (kind, p)))
                .filter(|(_, pen)| known.contains(&pen.start_time) && known.contains(&pen.end_time))
                .map(|(kind, pen)| PreviewSegment { kind, segment: PenSegment::from_record(&pen) })
                .collect()
        }
    };

    PenAnchorView { pen_segments: segments, pen_points, anchor_highlight, preview_segments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::factor::snapshot::{ANCHOR, FactorSnapshot, PEN};
    use serde_json::json;

    fn candles() -> Vec<Candle> {
        (1..=5).map(|i| Candle::flat(i * 60, i as f64)).collect()
    }

    fn slices(anchor: serde_json::Value) -> FactorSlices {
        let mut slices = FactorSlices::default();
        slices.snapshots.insert(
            PEN.into(),
            FactorSnapshot {
                head: json!({
                    "extending": {"start_time": 240, "end_time": 300, "start_price": 4.0, "end_price": 5.0},
                    "candidate": {"start_time": 240, "end_time": 360, "start_price": 4.0, "end_price": 6.0}
                }),
                history: json!({"confirmed": [
                    {"start_time": 60, "end_time": 120, "start_price": 1.0, "end_price": 2.0},
                    {"start_time": 120, "end_time": 240, "start_price": 2.0, "end_price": 4.0},
                    {"start_time": 240, "end_time": 420, "start_price": 4.0, "end_price": 3.0}
                ]}),
                meta: json!(null),
            },
        );
        slices.snapshots.insert(ANCHOR.into(), FactorSnapshot { head: anchor, ..Default::default() });
        slices
    }

    #[test]
    fn out_of_range_pens_are_filtered_and_points_shared() {
        let view = derive(Some(&slices(json!({}))), &candles(), ChartMode::Live, 10);
        assert_eq!(view.pen_segments.len(), 2);
        let times: Vec<i64> = view.pen_points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![60, 120, 240]);
        assert!(view.preview_segments.is_empty());
    }

    #[test]
    fn confirmed_anchor_marks_the_segment() {
        let anchor = json!({"current_anchor_ref": {"kind": "confirmed", "start_time": 120, "end_time": 240}});
        let view = derive(Some(&slices(anchor)), &candles(), ChartMode::Live, 10);
        assert_eq!(view.anchor_highlight, AnchorHighlight::Confirmed { key: "pen:120:240".into() });
        assert!(view.pen_segments[1].highlighted);
        assert!(!view.pen_segments[0].highlighted);
    }

    #[test]
    fn previews_need_loaded_endpoints() {
        let view = derive(Some(&slices(json!({}))), &candles(), ChartMode::Replay, 10);
        assert_eq!(view.preview_segments.len(), 1);
        assert_eq!(view.preview_segments[0].kind, PreviewKind::Extending);
    }

    #[test]
    fn cap_keeps_most_recent_segments() {
        let view = derive(Some(&slices(json!({}))), &candles(), ChartMode::Live, 1);
        assert_eq!(view.pen_segments.len(), 1);
        assert_eq!(view.pen_segments[0].key, "pen:120:240");
    }
}
