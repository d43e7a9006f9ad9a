//! Streaming statistics (Welford's algorithm).
//!
//! One accumulator per computation pass: rank thresholds during trim, drift
//! thresholds during chunking, throughput reporting per session.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
    weighted_sum: f64,
    weight_total: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new accumulation window.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add an observation with unit weight.
    pub fn push(&mut self, x: f64) {
        self.push_weighted(x, 1.0);
    }

    /// Add an observation. `weight` only affects [`RunningStats::weighted_average`].
    pub fn push_weighted(&mut self, x: f64, weight: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);

        self.min = Some(self.min.map_or(x, |m| m.min(x)));
        self.max = Some(self.max.map_or(x, |m| m.max(x)));

        self.weighted_sum += x * weight;
        self.weight_total += weight;
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; 0 with fewer than two observations.
    pub fn variance(&self) -> f64 {
        if self.n > 1 {
            self.m2 / (self.n - 1) as f64
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn weighted_average(&self) -> Option<f64> {
        if self.weight_total > 0.0 {
            Some(self.weighted_sum / self.weight_total)
        } else {
            None
        }
    }
}

impl Extend<f64> for RunningStats {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for x in iter {
            self.push(x);
        }
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::new();
        stats.extend(iter);
        stats
    }
}
