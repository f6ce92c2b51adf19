//! Rolling tick-time statistics reported by peers.

use std::collections::VecDeque;

/// Default number of samples kept per peer.
pub const DEFAULT_TICK_TIME_WINDOW: usize = 20;

/// Rolling window of milliseconds-per-tick samples.
#[derive(Debug, Clone)]
pub struct TickTimer {
    samples: VecDeque<f64>,
    window: usize,
}

impl TickTimer {
    /// Timer keeping the last `window` samples (at least one).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Add a sample. Negative or non-finite values are ignored; returns
    /// whether the sample was kept.
    pub fn record(&mut self, mspt: f64) -> bool {
        if !mspt.is_finite() || mspt < 0.0 {
            return false;
        }
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(mspt);
        true
    }

    /// Mean of the retained samples.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True before the first sample.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_TIME_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_covers_only_the_window() {
        let mut timer = TickTimer::new(3);
        assert_eq!(timer.average(), None);

        for sample in [10.0, 20.0, 30.0, 40.0] {
            assert!(timer.record(sample));
        }
        assert_eq!(timer.len(), 3);
        assert_eq!(timer.average(), Some(30.0));
    }

    #[test]
    fn rejects_garbage_samples() {
        let mut timer = TickTimer::default();
        assert!(!timer.record(f64::NAN));
        assert!(!timer.record(f64::INFINITY));
        assert!(!timer.record(-1.0));
        assert!(timer.is_empty());
    }
}
