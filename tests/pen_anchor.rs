use price_chart_overlay::domain::factor::{AnchorHighlight, ChartMode, FactorSlices, FactorSnapshot, derive};
use price_chart_overlay::domain::market_data::Candle;
use quickcheck_macros::quickcheck;
use serde_json::json;

fn candles(count: i64) -> Vec<Candle> {
    (1..=count).map(|i| Candle::flat(i * 60, i as f64)).collect()
}

/// Confirmed pens between consecutive pivot bars plus a candidate from the last pivot.
fn slices(pivots: &[i64], anchor_kind: &str, anchor_pen: usize) -> FactorSlices {
    let confirmed: Vec<_> = pivots
        .windows(2)
        .map(|w| json!({"start_time": w[0], "end_time": w[1], "start_price": 1.0, "end_price": 2.0}))
        .collect();
    let last = *pivots.last().unwrap_or(&60);
    let candidate = json!({"start_time": last, "end_time": last + 60, "start_price": 2.0, "end_price": 3.0});

    let (start, end) = match anchor_kind {
        "candidate" => (last, last + 60),
        _ => {
            let idx = anchor_pen % pivots.len().saturating_sub(1).max(1);
            (pivots.get(idx).copied().unwrap_or(60), pivots.get(idx + 1).copied().unwrap_or(120))
        }
    };

    let mut slices = FactorSlices::default();
    slices.snapshots.insert(
        "pen".to_string(),
        FactorSnapshot {
            head: json!({ "candidate": candidate }),
            history: json!({ "confirmed": confirmed }),
            meta: json!(null),
        },
    );
    slices.snapshots.insert(
        "anchor".to_string(),
        FactorSnapshot {
            head: json!({"current_anchor_ref": {"kind": anchor_kind, "start_time": start, "end_time": end}}),
            ..Default::default()
        },
    );
    slices
}

#[test]
fn candidate_anchor_is_dashed_and_never_marks_a_confirmed_pen() {
    let view = derive(Some(&slices(&[60, 180, 300], "candidate", 0)), &candles(8), ChartMode::Live, 50);
    assert!(matches!(view.anchor_highlight, AnchorHighlight::Candidate { .. }));
    assert!(view.pen_segments.iter().all(|s| !s.highlighted));
}

#[test]
fn anchor_outside_the_window_is_not_highlighted() {
    let view = derive(Some(&slices(&[60, 180, 300], "candidate", 0)), &candles(5), ChartMode::Live, 50);
    assert_eq!(view.anchor_highlight, AnchorHighlight::None);
}

#[test]
fn no_candles_means_nothing_to_draw() {
    let view = derive(Some(&slices(&[60, 180], "confirmed", 0)), &[], ChartMode::Replay, 50);
    assert!(view.pen_segments.is_empty());
    assert_eq!(view.anchor_highlight, AnchorHighlight::None);
}

#[quickcheck]
fn highlight_is_exclusive(steps: Vec<u8>, confirmed: bool, anchor_pen: usize) -> bool {
    let mut pivots = vec![60i64];
    for step in steps.iter().take(20) {
        let next = pivots[pivots.len() - 1] + 60 * (i64::from(*step % 4) + 1);
        pivots.push(next);
    }
    let kind = if confirmed { "confirmed" } else { "candidate" };
    let view = derive(Some(&slices(&pivots, kind, anchor_pen)), &candles(100), ChartMode::Replay, 200);

    let highlighted: Vec<&str> = view.pen_segments.iter().filter(|s| s.highlighted).map(|s| s.key.as_str()).collect();
    match &view.anchor_highlight {
        AnchorHighlight::Confirmed { key } => highlighted == vec![key.as_str()],
        AnchorHighlight::Candidate { .. } | AnchorHighlight::None => highlighted.is_empty(),
    }
}
