//! Running-average event rate

use std::collections::VecDeque;
use std::time::Instant;

/// Events per second over the last `window` observations
///
/// Each observation is a point in time plus the number of events since the
/// previous one. With one event per observation this is a plain tick counter.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    window: usize,
    points: VecDeque<(Instant, u64)>,
    total: u64,
    rate: f64,
}

impl ThroughputMeter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            points: VecDeque::with_capacity(window + 1),
            total: 0,
            rate: 0.0,
        }
    }

    /// One event, now
    pub fn tick(&mut self) {
        self.record_at(Instant::now(), 1);
    }

    /// `count` events since the last observation
    pub fn record(&mut self, count: u64) {
        self.record_at(Instant::now(), count);
    }

    pub fn record_at(&mut self, at: Instant, count: u64) {
        self.total += count;
        self.points.push_back((at, count));
        if self.points.len() > self.window {
            self.points.pop_front();
        }

        let (Some(first), Some(last)) = (self.points.front(), self.points.back()) else {
            return;
        };
        let span = last.0.saturating_duration_since(first.0).as_secs_f64();
        if self.points.len() > 1 && span > 0.0 {
            // the oldest point only marks the start of the span
            let counted: u64 = self.points.iter().skip(1).map(|(_, n)| n).sum();
            self.rate = counted as f64 / span;
        }
    }

    /// Events per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Events since creation
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(5)
    }
}
