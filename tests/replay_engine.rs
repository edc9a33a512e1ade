mod common;

use common::*;
use futures::executor::LocalPool;
use futures::task::LocalSpawn;
use price_chart_overlay::application::config::ChartConfig;
use price_chart_overlay::application::replay_engine::{ReplayPorts, ReplayWindowEngine};
use price_chart_overlay::application::session::{ChartObserver, LoadPhase, ReplayPosition};
use price_chart_overlay::domain::errors::ChartError;
use price_chart_overlay::domain::market_data::{Candle, SeriesId};
use price_chart_overlay::domain::overlay::{InstructionDefinition, InstructionKind, OverlayInstruction};
use price_chart_overlay::domain::replay::{
    ActiveCheckpoint, ActiveDiff, FactorHistoryEvent, ReplayFactorPack, ReplayWindow, ReplayWindowBundle,
};
use price_chart_overlay::domain::repositories::{JobState, JobStatus, ReplayMetadata, Timer};
use serde_json::json;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

const WINDOW: usize = 10;
const TOTAL: usize = 25;

fn pivot(id: &str, time: i64) -> OverlayInstruction {
    OverlayInstruction {
        instruction_id: id.to_string(),
        version_id: 1,
        kind: InstructionKind::Marker,
        visible_time: time,
        definition: InstructionDefinition { feature: "pivot.major".into(), time: Some(time), ..Default::default() },
    }
}

fn bundle(window_index: usize) -> ReplayWindowBundle {
    let start = window_index * WINDOW;
    let end = (start + WINDOW).min(TOTAL) - 1;
    let time = |idx: usize| 60 * (idx as i64 + 1);
    let pen = |from: i64, to: i64| json!({"start_time": from, "end_time": to, "start_price": 1.0, "end_price": 2.0});

    ReplayWindowBundle {
        window: ReplayWindow {
            window_index,
            start_idx: start,
            end_idx: end,
            kline: (start..=end).map(|idx| Candle::flat(time(idx), 1.0)).collect(),
            draw_catalog_base: vec![pivot("P", time(start + 5))],
            draw_catalog_patch: Vec::new(),
            draw_active_checkpoints: vec![ActiveCheckpoint { at_idx: start, active_ids: Vec::new() }],
            draw_active_diffs: vec![ActiveDiff { at_idx: start + 5, add_ids: vec!["P".into()], remove_ids: Vec::new() }],
        },
        factor_snapshots: ReplayFactorPack {
            factors: vec!["pen".into()],
            history_events: vec![
                FactorHistoryEvent { event_id: 2, factor_name: "pen".into(), kind: "confirmed".into(), payload: pen(120, 240) },
                FactorHistoryEvent { event_id: 1, factor_name: "pen".into(), kind: "confirmed".into(), payload: pen(60, 120) },
            ],
            event_cutoffs: BTreeMap::from([(180, 1), (240, 2)]),
            head_snapshots: BTreeMap::new(),
        },
    }
}

fn done(total: usize) -> JobStatus {
    JobStatus {
        status: JobState::Done,
        error: None,
        metadata: Some(ReplayMetadata { total_candles: total, window_size: WINDOW, ..Default::default() }),
    }
}

fn building() -> JobStatus {
    JobStatus { status: JobState::Building, error: None, metadata: None }
}

fn source() -> FakeReplaySource {
    let source = FakeReplaySource::default();
    source.coverage_states.borrow_mut().extend([Ok(building()), Ok(done(0))]);
    source.build_states.borrow_mut().push_back(Ok(done(TOTAL)));
    for index in 0..3 {
        source.windows.borrow_mut().insert(index * WINDOW, bundle(index));
    }
    source
}

struct Rig {
    pool: LocalPool,
    source: Rc<FakeReplaySource>,
    timer: Rc<ImmediateTimer>,
    observer: Rc<RecordingObserver>,
    engine: ReplayWindowEngine<FakeReplaySource>,
}

fn rig(source: FakeReplaySource) -> Rig {
    let mut config = ChartConfig::default();
    config.replay.window_size = WINDOW;
    config.replay.prefetch_margin = 3;
    config.replay.build_poll_attempts = 5;

    let pool = LocalPool::new();
    let source = Rc::new(source);
    let timer = Rc::new(ImmediateTimer::default());
    let observer = Rc::new(RecordingObserver::default());
    let ports = ReplayPorts {
        source: Rc::clone(&source),
        timer: timer.clone() as Rc<dyn Timer>,
        observer: observer.clone() as Rc<dyn ChartObserver>,
        spawner: Rc::new(pool.spawner()) as Rc<dyn LocalSpawn>,
    };
    let engine = ReplayWindowEngine::new(SeriesId::from(SERIES), &config, ports);
    Rig { pool, source, timer, observer, engine }
}

fn prepared() -> Rig {
    let mut rig = rig(source());
    rig.pool.run_until(rig.engine.prepare()).expect("replay prepared");
    rig
}

#[test]
fn prepare_waits_for_coverage_then_build() {
    let mut rig = rig(source());
    let metadata = rig.pool.run_until(rig.engine.prepare()).unwrap();

    assert_eq!(metadata.total_candles, TOTAL);
    assert_eq!(rig.engine.total(), TOTAL);
    assert_eq!(*rig.timer.sleeps.borrow(), vec![Duration::from_millis(500)]);
    assert_eq!(rig.source.builds.borrow().len(), 1);
    assert_eq!(rig.observer.phases(), vec![LoadPhase::Loading, LoadPhase::Loading, LoadPhase::Ready]);
}

#[test]
fn failed_build_surfaces_server_detail() {
    let source = FakeReplaySource::default();
    source.coverage_states.borrow_mut().push_back(Ok(done(0)));
    source.build_states.borrow_mut().push_back(Ok(JobStatus {
        status: JobState::Error,
        error: Some("coverage short".to_string()),
        metadata: None,
    }));
    let mut rig = rig(source);

    let result = rig.pool.run_until(rig.engine.prepare());
    assert_eq!(result, Err(ChartError::Replay("coverage short".to_string())));
    let status = rig.observer.last_status().unwrap();
    assert_eq!((status.phase, status.message.as_deref()), (LoadPhase::Error, Some("coverage short")));
}

#[test]
fn seeking_before_prepare_is_an_error() {
    let mut rig = rig(source());
    assert!(matches!(rig.pool.run_until(rig.engine.seek(0)), Err(ChartError::Replay(_))));
}

#[test]
fn seeks_within_a_window_reuse_bundle_and_catalog() {
    let mut rig = prepared();

    let early = rig.pool.run_until(rig.engine.seek(2)).unwrap();
    assert_eq!(early.candles.len(), 3);
    assert_eq!(early.position, ReplayPosition { index: 2, total: TOTAL, focus_time: Some(180) });
    assert!(early.active_ids.is_empty());
    assert_eq!(early.pens.pen_segments.len(), 1);

    let later = rig.pool.run_until(rig.engine.seek(5)).unwrap();
    assert_eq!(later.active_ids.iter().collect::<Vec<_>>(), vec!["P"]);
    assert_eq!(later.overlays.pivot_markers.len(), 1);
    assert_eq!(later.pens.pen_segments.len(), 2);
    assert!(Rc::ptr_eq(&early.catalog, &later.catalog));

    assert_eq!(rig.engine.window_fetches(), 1);
    assert_eq!(rig.engine.catalog_merges(), 1);
    assert_eq!(rig.source.requests_for(0), 1);
    assert_eq!(rig.observer.positions.borrow().len(), 2);
}

#[test]
fn index_is_clamped_to_the_package() {
    let mut rig = prepared();
    let frame = rig.pool.run_until(rig.engine.seek(1_000)).unwrap();
    assert_eq!(frame.position.index, TOTAL - 1);
    assert_eq!(frame.window_index, 2);
}

#[test]
fn seek_near_window_end_prefetches_next_window_once() {
    let mut rig = prepared();
    let release = rig.source.gate_window(WINDOW);

    rig.pool.run_until(rig.engine.seek(7)).unwrap();
    rig.pool.run_until_stalled();
    assert!(rig.engine.is_in_progress(1));
    assert_eq!(rig.source.requests_for(WINDOW), 1);

    rig.engine.prefetch(1);
    rig.pool.run_until(rig.engine.seek(8)).unwrap();
    assert_eq!(rig.source.requests_for(WINDOW), 1);

    release.send(()).unwrap();
    let frame = rig.pool.run_until(rig.engine.seek(12)).unwrap();
    assert_eq!(frame.window_index, 1);
    assert_eq!(rig.source.requests_for(WINDOW), 1);
    assert_eq!(rig.engine.window_fetches(), 2);
    assert!(rig.engine.is_cached(1));
    assert_eq!(rig.engine.catalog_merges(), 2);
}

#[test]
fn stopped_replay_publishes_nothing() {
    let mut rig = prepared();
    rig.pool.run_until(rig.engine.seek(3)).unwrap();
    let updates = rig.observer.update_count();

    rig.engine.stop();
    let _ = rig.pool.run_until(rig.engine.seek(4));
    assert_eq!(rig.observer.update_count(), updates);
}

#[test]
fn failed_prefetch_is_refetched_on_seek() {
    let mut rig = prepared();
    let next = rig.source.windows.borrow_mut().remove(&WINDOW).unwrap();

    rig.pool.run_until(rig.engine.seek(7)).unwrap();
    rig.pool.run_until_stalled();
    assert_eq!(rig.source.requests_for(WINDOW), 1);

    rig.source.windows.borrow_mut().insert(WINDOW, next);
    let frame = rig.pool.run_until(rig.engine.seek(12)).unwrap();
    assert_eq!(frame.window_index, 1);
    assert_eq!(rig.source.requests_for(WINDOW), 2);
    assert!(rig.engine.is_cached(1));
    assert!(!rig.engine.is_in_progress(1));
}
