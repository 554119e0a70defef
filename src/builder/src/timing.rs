//! Wall-clock accumulation for diagnostic reporting.
//!
//! Hashing dominates snapshot cost, so the engine accepts an optional
//! recorder and charges hashing time to it. The recorder is a collaborator
//! handed in by the caller, not process-global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Accumulates elapsed wall-clock time per category.
///
/// Cloning is cheap; clones share the same accumulator.
#[derive(Clone, Default)]
pub struct TimingRecorder {
    totals: Arc<Mutex<HashMap<&'static str, Duration>>>,
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a span; elapsed time is charged to `category` when the span
    /// is dropped.
    pub fn start(&self, category: &'static str) -> TimingSpan {
        TimingSpan {
            recorder: self.clone(),
            category,
            started: Instant::now(),
        }
    }

    /// Total time charged to `category` so far.
    pub fn total(&self, category: &'static str) -> Duration {
        self.totals
            .lock()
            .expect("timing recorder lock poisoned")
            .get(category)
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, category: &'static str, elapsed: Duration) {
        let mut totals = self.totals.lock().expect("timing recorder lock poisoned");
        *totals.entry(category).or_default() += elapsed;
    }
}

/// In-flight timing measurement; records on drop.
pub struct TimingSpan {
    recorder: TimingRecorder,
    category: &'static str,
    started: Instant,
}

impl Drop for TimingSpan {
    fn drop(&mut self) {
        self.recorder.record(self.category, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_accumulates_on_drop() {
        let recorder = TimingRecorder::new();
        {
            let _span = recorder.start("hashing");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorder.total("hashing") >= Duration::from_millis(5));
    }

    #[test]
    fn test_categories_are_independent() {
        let recorder = TimingRecorder::new();
        drop(recorder.start("a"));
        assert_eq!(recorder.total("b"), Duration::ZERO);
    }

    #[test]
    fn test_clones_share_totals() {
        let recorder = TimingRecorder::new();
        let clone = recorder.clone();
        {
            let _span = clone.start("hashing");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(recorder.total("hashing") > Duration::ZERO);
    }
}
