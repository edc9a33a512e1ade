use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::value_objects::TimeRange;

/// Domain entity - one OHLC bar. `time` is the aligned bar open in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self { time, open, high, low, close }
    }

    /// Flat bar, handy for forming updates that only carry a price.
    pub fn flat(time: i64, price: f64) -> Self {
        Self::new(time, price, price, price, price)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Apply one incoming bar to an ordered window.
///
/// Same time replaces the last bar, newer time appends, older time is dropped.
/// Returns `None` when the bar was stale and nothing changed.
pub fn merge_candle(existing: &[Candle], incoming: Candle, limit: usize) -> Option<Vec<Candle>> {
    merge_candles(existing, std::slice::from_ref(&incoming), limit)
}

/// Batch form of [`merge_candle`]: applies the single-bar rule in order and
/// keeps the most recent `limit` bars.
pub fn merge_candles(existing: &[Candle], incoming: &[Candle], limit: usize) -> Option<Vec<Candle>> {
    let mut merged: Vec<Candle> = existing.to_vec();
    let mut changed = false;

    for candle in incoming {
        match merged.last_mut() {
            Some(last) if candle.time == last.time => {
                if last != candle {
                    *last = *candle;
                    changed = true;
                }
            }
            Some(last) if candle.time < last.time => {}
            _ => {
                merged.push(*candle);
                changed = true;
            }
        }
    }

    if merged.len() > limit {
        let excess = merged.len() - limit;
        merged.drain(..excess);
        changed = true;
    }

    changed.then_some(merged)
}

/// Bounded, time-ordered bar buffer of the active series.
///
/// Every change swaps in a fresh `Arc`, so observers can detect updates with
/// `Arc::ptr_eq` instead of comparing contents.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: Arc<Vec<Candle>>,
    limit: usize,
}

impl CandleWindow {
    pub fn new(limit: usize) -> Self {
        Self { candles: Arc::new(Vec::new()), limit: limit.max(1) }
    }

    /// Seed from a backfill. Input is normalized through the merge rule so an
    /// unordered response cannot break the ordering invariant.
    pub fn replace(&mut self, candles: &[Candle]) {
        let mut sorted = candles.to_vec();
        sorted.sort_by_key(|c| c.time);
        let merged = merge_candles(&[], &sorted, self.limit).unwrap_or_default();
        self.candles = Arc::new(merged);
    }

    pub fn apply_batch(&mut self, incoming: &[Candle]) -> bool {
        match merge_candles(&self.candles, incoming, self.limit) {
            Some(next) => {
                self.candles = Arc::new(next);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, incoming: Candle) -> bool {
        self.apply_batch(std::slice::from_ref(&incoming))
    }

    /// Forming bars only ever touch the tip: they replace the last bar or
    /// open a new one, exactly like a closed bar.
    pub fn apply_forming(&mut self, incoming: Candle) -> bool {
        self.apply(incoming)
    }

    pub fn clear(&mut self) {
        self.candles = Arc::new(Vec::new());
    }

    pub fn snapshot(&self) -> Arc<Vec<Candle>> {
        Arc::clone(&self.candles)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn last_time(&self) -> Option<i64> {
        self.candles.last().map(|c| c.time)
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        match (self.candles.first(), self.candles.last()) {
            (Some(first), Some(last)) => Some(TimeRange::new(first.time, last.time)),
            _ => None,
        }
    }
}
