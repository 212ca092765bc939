// Build progress gauge
// Two atomics shared between walker workers and the presentation layer

use std::sync::atomic::{AtomicU64, Ordering};

/// Fraction-of-work-done gauge.
///
/// The walker sets a denominator up front (record count for the MFT path,
/// used bytes for the directory path) and workers add to the numerator as
/// they go. With an unknown denominator the gauge reads 0.0 until
/// `complete` is called.
#[derive(Debug, Default)]
pub struct ProgressGauge {
    processed: AtomicU64,
    total: AtomicU64,
}

impl ProgressGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add(&self, amount: u64) {
        self.processed.fetch_add(amount, Ordering::Relaxed);
    }

    /// Pin the gauge at 1.0 once a build with an unknown total finishes.
    pub fn complete(&self) {
        self.total.store(1, Ordering::Relaxed);
        self.processed.store(1, Ordering::Relaxed);
    }

    pub fn fraction(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let processed = self.processed.load(Ordering::Relaxed);
        (processed as f64 / total as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_tracks_processed_over_total() {
        let gauge = ProgressGauge::new();
        assert_eq!(gauge.fraction(), 0.0);
        gauge.set_total(200);
        gauge.add(50);
        assert_eq!(gauge.fraction(), 0.25);
        gauge.add(300);
        assert_eq!(gauge.fraction(), 1.0);
    }

    #[test]
    fn complete_pins_unknown_totals() {
        let gauge = ProgressGauge::new();
        gauge.add(42);
        assert_eq!(gauge.fraction(), 0.0);
        gauge.complete();
        assert_eq!(gauge.fraction(), 1.0);
    }
}
