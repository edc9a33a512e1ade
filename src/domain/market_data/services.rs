use super::entities::Candle;
use super::value_objects::Timeframe;

/// Shape of one backfill response, compared between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub count: usize,
    pub first_time: Option<i64>,
    pub last_time: Option<i64>,
    pub head_time: Option<i64>,
}

impl FetchSummary {
    pub fn of(candles: &[Candle], head_time: Option<i64>) -> Self {
        Self {
            count: candles.len(),
            first_time: candles.first().map(|c| c.time),
            last_time: candles.last().map(|c| c.time),
            head_time,
        }
    }
}

/// Verdict for one backfill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Server is still catching up; retry.
    Backfilling,
}

/// True when every bar is exactly one timeframe apart.
pub fn is_contiguous(candles: &[Candle], timeframe: Timeframe) -> bool {
    let step = timeframe.seconds();
    candles.windows(2).all(|pair| pair[1].time - pair[0].time == step)
}

/// Decide whether a backfill response can seed the window.
///
/// Several bars: regular spacing and a tip equal to the server head.
/// A single bar: accepted once two consecutive fetches return the same summary.
pub fn assess_readiness(
    candles: &[Candle],
    head_time: Option<i64>,
    timeframe: Timeframe,
    previous: Option<&FetchSummary>,
) -> Readiness {
    let summary = FetchSummary::of(candles, head_time);
    match summary.count {
        0 => Readiness::Backfilling,
        1 => match previous {
            Some(prev) if *prev == summary => Readiness::Ready,
            _ => Readiness::Backfilling,
        },
        _ => {
            let head_matches = head_time.is_some() && summary.last_time == head_time;
            if head_matches && is_contiguous(candles, timeframe) {
                Readiness::Ready
            } else {
                Readiness::Backfilling
            }
        }
    }
}

/// Growing retry delay, doubled per attempt and capped.
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(times: &[i64]) -> Vec<Candle> {
        times.iter().map(|&t| Candle::flat(t, 1.0)).collect()
    }

    #[test]
    fn contiguous_window_with_matching_head_is_ready() {
        let candles = bars(&[60, 120, 180]);
        assert_eq!(assess_readiness(&candles, Some(180), Timeframe::OneMinute, None), Readiness::Ready);
    }

    #[test]
    fn head_mismatch_keeps_backfilling() {
        let candles = bars(&[60, 120, 180]);
        assert_eq!(
            assess_readiness(&candles, Some(240), Timeframe::OneMinute, None),
            Readiness::Backfilling
        );
    }

    #[test]
    fn holes_keep_backfilling() {
        let candles = bars(&[60, 180, 240]);
        assert_eq!(
            assess_readiness(&candles, Some(240), Timeframe::OneMinute, None),
            Readiness::Backfilling
        );
    }

    #[test]
    fn single_bar_needs_two_identical_summaries() {
        let candles = bars(&[600]);
        assert_eq!(assess_readiness(&candles, Some(600), Timeframe::OneMinute, None), Readiness::Backfilling);

        let prev = FetchSummary::of(&candles, Some(600));
        assert_eq!(assess_readiness(&candles, Some(600), Timeframe::OneMinute, Some(&prev)), Readiness::Ready);

        let moved = FetchSummary::of(&bars(&[540]), Some(540));
        assert_eq!(
            assess_readiness(&candles, Some(600), Timeframe::OneMinute, Some(&moved)),
            Readiness::Backfilling
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(0, 250, 4000), 250);
        assert_eq!(backoff_delay_ms(2, 250, 4000), 1000);
        assert_eq!(backoff_delay_ms(10, 250, 4000), 4000);
    }
}
