//! Sliding-window decrypt failure monitor.
//!
//! Tracks the outcome of the most recent inbound frames. The tunnel is
//! considered broken once the window is full and the share of failures in it
//! exceeds the threshold.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct FailureMonitor {
    outcomes: VecDeque<bool>,
    window: usize,
    failures: usize,
    threshold: f64,
}

impl FailureMonitor {
    pub fn new(window: usize, threshold: f64) -> Self {
        let window = window.max(1);
        Self {
            outcomes: VecDeque::with_capacity(window),
            window,
            failures: 0,
            threshold,
        }
    }

    pub fn record_success(&mut self) -> bool {
        self.record(false)
    }

    /// Returns true once the failure rate is over the threshold.
    pub fn record_failure(&mut self) -> bool {
        self.record(true)
    }

    fn record(&mut self, failed: bool) -> bool {
        if self.outcomes.len() == self.window {
            if let Some(true) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(failed);
        if failed {
            self.failures += 1;
        }
        self.is_tripped()
    }

    /// Failure share over the frames seen so far, at most `window` of them.
    pub fn ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.failures as f64 / self.outcomes.len() as f64
        }
    }

    pub fn is_full(&self) -> bool {
        self.outcomes.len() == self.window
    }

    pub fn is_tripped(&self) -> bool {
        self.is_full() && self.ratio() > self.threshold
    }
}
