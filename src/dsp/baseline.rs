//! Online baseline/variance estimator: exponential moving average of the
//! envelope's mean and variance, defining the adaptive noise floor. Adapts
//! slowly with ambient conditions but cannot be defeated by one large
//! sample.

use crate::config::VARIANCE_EPS;

/// EMA tracker for the envelope's mean and variance.
///
/// During warm-up (fewer samples seen than the envelope window) the
/// baseline tracks the envelope instantaneously, which suppresses triggers
/// until the estimator has real history.
#[derive(Debug, Clone)]
pub struct BaselineEstimator {
    alpha: f64,
    warmup_samples: u64,
    baseline: f64,
    variance: f64,
    seen: u64,
}

impl BaselineEstimator {
    /// `alpha` is the per-sample EMA coefficient (`1 - exp(-dt/tau)`),
    /// `warmup_samples` is the envelope window size.
    pub fn new(alpha: f64, warmup_samples: u64) -> Self {
        Self {
            alpha,
            warmup_samples,
            baseline: 0.0,
            variance: 0.001,
            seen: 0,
        }
    }

    /// Fold one envelope value into the estimate.
    #[inline]
    pub fn update(&mut self, env: f64) {
        self.seen += 1;
        if self.seen <= self.warmup_samples {
            self.baseline = env;
            return;
        }
        let err = env - self.baseline;
        self.baseline += self.alpha * err;
        self.variance += self.alpha * (err * err - self.variance);
        if self.variance < 0.0 {
            self.variance = 0.0;
        }
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Standard deviation with the epsilon floor applied, as used by the
    /// trigger threshold.
    pub fn std_floored(&self) -> f64 {
        self.variance.max(VARIANCE_EPS).sqrt()
    }

    /// True while the baseline still tracks the envelope one-to-one.
    pub fn warming_up(&self) -> bool {
        self.seen <= self.warmup_samples
    }

    /// Restore construction-time state; configuration is untouched.
    pub fn reset(&mut self) {
        self.baseline = 0.0;
        self.variance = 0.001;
        self.seen = 0;
    }

    pub fn is_finite(&self) -> bool {
        self.baseline.is_finite() && self.variance.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_tracks_instantaneously() {
        let mut est = BaselineEstimator::new(0.01, 5);
        est.update(3.0);
        assert_eq!(est.baseline(), 3.0);
        est.update(7.0);
        assert_eq!(est.baseline(), 7.0);
        assert!(est.warming_up());
    }

    #[test]
    fn converges_to_constant_input() {
        let mut est = BaselineEstimator::new(0.05, 3);
        for _ in 0..2000 {
            est.update(2.0);
        }
        assert!((est.baseline() - 2.0).abs() < 1e-6);
        assert!(est.variance() < 1e-6);
    }

    #[test]
    fn spike_moves_baseline_only_slightly() {
        let mut est = BaselineEstimator::new(0.01, 2);
        for _ in 0..500 {
            est.update(1.0);
        }
        let before = est.baseline();
        est.update(10.0);
        let after = est.baseline();
        // One 10x spike moves the floor by alpha * err, nothing more.
        assert!((after - before - 0.01 * 9.0).abs() < 1e-9);
        assert!(after < 1.2);
    }

    #[test]
    fn variance_never_negative() {
        let mut est = BaselineEstimator::new(0.5, 0);
        for i in 0..100 {
            est.update(if i % 2 == 0 { 1.0 } else { -1.0 });
            assert!(est.variance() >= 0.0);
        }
        assert!(est.std_floored() >= VARIANCE_EPS.sqrt());
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut est = BaselineEstimator::new(0.1, 2);
        for _ in 0..50 {
            est.update(4.0);
        }
        est.reset();
        assert_eq!(est.baseline(), 0.0);
        assert!((est.variance() - 0.001).abs() < 1e-12);
        assert!(est.warming_up());
    }

    #[test]
    fn quiescent_input_drives_baseline_to_zero() {
        let mut est = BaselineEstimator::new(0.02, 6);
        for _ in 0..3000 {
            est.update(0.0);
        }
        assert!(est.baseline().abs() < 1e-9);
    }
}
