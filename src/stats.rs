use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Running mean accumulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self { n_vals: 0, mean: 0.0 }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;
        self.mean += (val - self.mean) / self.n_vals as f64;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> usize {
        self.n_vals
    }
}

/// Pair of sliding FIFO windows over a daily series.
///
/// New samples enter the `current` window; once it holds more than `period`
/// samples the oldest one is pushed into the `past` window, which is itself
/// capped at `period`. The government compares the two window averages to
/// classify the infection trend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingPair {
    period: usize,
    current: VecDeque<f64>,
    past: VecDeque<f64>,
}

impl SlidingPair {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            current: VecDeque::with_capacity(period + 1),
            past: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn push(&mut self, val: f64) {
        self.current.push_back(val);
        if self.current.len() > self.period {
            if let Some(overflow) = self.current.pop_front() {
                self.past.push_back(overflow);
            }
        }
        if self.past.len() > self.period {
            self.past.pop_front();
        }
    }

    /// Average of the current window, or `None` while it is empty.
    pub fn current_avg(&self) -> Option<f64> {
        avg(&self.current)
    }

    /// Average of the past window, or `None` while it is empty.
    pub fn past_avg(&self) -> Option<f64> {
        avg(&self.past)
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.past.clear();
    }
}

fn avg(window: &VecDeque<f64>) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}
