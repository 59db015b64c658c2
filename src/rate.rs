//! Frame-rate smoothing.

use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept by default.
pub const DEFAULT_RATE_WINDOW: usize = 200;

/// Running mean of instantaneous frame rates over a FIFO window.
#[derive(Clone, Debug)]
pub struct FrameRateEstimator {
    samples: VecDeque<f64>,
    capacity: usize,
    average: f64,
}

impl FrameRateEstimator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            average: 0.0,
        }
    }

    /// Record one cycle duration and return the updated average rate.
    ///
    /// A zero duration has no finite rate and is ignored.
    pub fn record(&mut self, duration: Duration) -> f64 {
        let secs = duration.as_secs_f64();
        if secs <= 0.0 {
            return self.average;
        }
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(1.0 / secs);
        self.average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.average
    }

    /// Mean of the held samples; `0.0` before the first sample.
    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameRateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_reciprocal_durations() {
        let mut rate = FrameRateEstimator::default();
        assert_eq!(rate.average(), 0.0);
        rate.record(Duration::from_millis(100));
        let avg = rate.record(Duration::from_millis(50));
        assert!((avg - 15.0).abs() < 1e-9);
    }

    #[test]
    fn evicts_oldest_sample_at_capacity() {
        let mut rate = FrameRateEstimator::default();
        // first sample is an outlier: 1000 fps
        rate.record(Duration::from_millis(1));
        for _ in 0..199 {
            rate.record(Duration::from_millis(100));
        }
        assert_eq!(rate.len(), 200);
        assert!(rate.average() > 10.0);

        let avg = rate.record(Duration::from_millis(100));
        assert_eq!(rate.len(), 200);
        assert!((avg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_duration_is_ignored() {
        let mut rate = FrameRateEstimator::new(4);
        rate.record(Duration::from_millis(200));
        assert!((rate.record(Duration::ZERO) - 5.0).abs() < 1e-9);
        assert_eq!(rate.len(), 1);
    }
}
