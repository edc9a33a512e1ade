use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use price_chart_overlay::domain::market_data::{Candle, CandleWindow, merge_candles};
use price_chart_overlay::domain::replay::{ActiveCheckpoint, ActiveDiff, ReplayWindow, active_ids_by_full_replay};
use std::hint::black_box;
use std::time::Duration;

/// Minute bars with a slow drift, starting at a fixed epoch.
fn generate_candles(count: usize, start: i64) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let time = start + i as i64 * 60;
            let open = 50_000.0 + (i as f64 * 0.01).sin() * 500.0;
            let close = open + (i as f64 * 0.3).cos() * 40.0;
            Candle::new(time, open, open.max(close) + 15.0, open.min(close) - 15.0, close)
        })
        .collect()
}

/// A window whose diff log toggles a rolling set of ids, checkpointed every `interval` bars.
fn generate_window(bars: usize, interval: usize) -> ReplayWindow {
    let id = |i: usize| format!("pivot.major:{}", i % 40);
    let diffs: Vec<ActiveDiff> = (0..bars)
        .map(|i| ActiveDiff {
            at_idx: i,
            add_ids: vec![id(i)],
            remove_ids: if i >= 20 { vec![id(i - 20)] } else { Vec::new() },
        })
        .collect();

    let checkpoints = (0..bars)
        .step_by(interval)
        .map(|at_idx| ActiveCheckpoint {
            at_idx,
            active_ids: active_ids_by_full_replay(&diffs, at_idx).into_iter().collect(),
        })
        .collect();

    ReplayWindow {
        window_index: 0,
        start_idx: 0,
        end_idx: bars - 1,
        kline: generate_candles(bars, 1_640_000_000),
        draw_catalog_base: Vec::new(),
        draw_catalog_patch: Vec::new(),
        draw_active_checkpoints: checkpoints,
        draw_active_diffs: diffs,
    }
}

fn bench_candle_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("candle_merge");
    group.measurement_time(Duration::from_secs(5));

    for size in [500, 2000, 5000] {
        let existing = generate_candles(size, 1_640_000_000);
        let tail_start = existing.last().map_or(0, |c| c.time) - 60 * 10;
        let batch = generate_candles(20, tail_start);

        group.bench_with_input(BenchmarkId::new("merge_batch", size), &size, |b, &size| {
            b.iter(|| merge_candles(black_box(&existing), black_box(&batch), size))
        });

        group.bench_with_input(BenchmarkId::new("window_apply_tip", size), &size, |b, &size| {
            let mut window = CandleWindow::new(size);
            window.replace(&existing);
            let mut tip = existing[existing.len() - 1];
            b.iter(|| {
                tip.close += 1.0;
                window.apply_forming(black_box(tip))
            })
        });
    }

    group.finish();
}

fn bench_active_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("active_reconstruction");

    let window = generate_window(2000, 100);
    for target in [150, 999, 1999] {
        group.bench_with_input(BenchmarkId::new("checkpointed", target), &target, |b, &target| {
            b.iter(|| window.active_ids_at(black_box(target)))
        });
        group.bench_with_input(BenchmarkId::new("full_replay", target), &target, |b, &target| {
            b.iter(|| active_ids_by_full_replay(black_box(&window.draw_active_diffs), target))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_candle_merge, bench_active_reconstruction);
criterion_main!(benches);
