//! Windowed RMS envelope: fixed pre-allocated circular buffer of squared
//! samples with an incrementally maintained sum-of-squares. Never grows.

/// Fixed-capacity circular RMS buffer. The running sum-of-squares always
/// equals the sum of squares of the current contents; it is maintained
/// incrementally (evicted square subtracted, new square added), never
/// recomputed.
#[derive(Debug, Clone)]
pub struct EnvelopeBuffer {
    squares: Box<[f64]>,
    write_pos: usize,
    filled: usize,
    sum_sq: f64,
}

impl EnvelopeBuffer {
    /// Create a zeroed buffer of `capacity` samples (>= 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            squares: vec![0.0; capacity].into_boxed_slice(),
            write_pos: 0,
            filled: 0,
            sum_sq: 0.0,
        }
    }

    /// Push one sample and return the current RMS. Until the buffer has
    /// wrapped once the divisor is the fill count, which guards the
    /// divide-by-zero and biases the estimate low during warm-up — that
    /// bias is intentional and keeps early triggers suppressed.
    #[inline]
    pub fn update(&mut self, x: f64) -> f64 {
        let sq = x * x;
        self.sum_sq -= self.squares[self.write_pos];
        self.squares[self.write_pos] = sq;
        self.sum_sq += sq;
        self.write_pos = (self.write_pos + 1) % self.squares.len();
        if self.filled < self.squares.len() {
            self.filled += 1;
        }
        // Accumulated float error can push the sum fractionally negative
        // once large values rotate out.
        let sum = self.sum_sq.max(0.0);
        (sum / self.filled as f64).sqrt()
    }

    /// Zero contents and the running sum without changing capacity.
    pub fn reset(&mut self) {
        self.squares.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.sum_sq = 0.0;
    }

    pub fn capacity(&self) -> usize {
        self.squares.len()
    }

    /// Samples currently held (capacity once wrapped).
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// True once the window has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.filled == self.squares.len()
    }

    /// True if the running sum has gone NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.sum_sq.is_finite()
    }

    #[cfg(test)]
    fn recomputed_sum_sq(&self) -> f64 {
        self.squares.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_divides_by_fill_count() {
        let mut env = EnvelopeBuffer::new(4);
        // First sample: sqrt(4/1) = 2
        assert!((env.update(2.0) - 2.0).abs() < 1e-12);
        // Second: sqrt((4+4)/2) = 2
        assert!((env.update(2.0) - 2.0).abs() < 1e-12);
        assert!(!env.is_full());
    }

    #[test]
    fn rms_of_constant_is_constant() {
        let mut env = EnvelopeBuffer::new(8);
        let mut last = 0.0;
        for _ in 0..32 {
            last = env.update(3.0);
        }
        assert!((last - 3.0).abs() < 1e-12);
        assert!(env.is_full());
    }

    #[test]
    fn sine_rms_converges_to_amplitude_over_sqrt2() {
        // 10 Hz sine at 100 Hz, window of 50 samples = 5 full periods.
        let mut env = EnvelopeBuffer::new(50);
        let mut last = 0.0;
        for i in 0..200 {
            let x = (2.0 * std::f64::consts::PI * 10.0 * i as f64 / 100.0).sin();
            last = env.update(x);
        }
        let expected = 1.0 / 2.0_f64.sqrt();
        assert!((last - expected).abs() < 1e-9, "rms {last} vs {expected}");
    }

    #[test]
    fn incremental_sum_matches_contents() {
        let mut env = EnvelopeBuffer::new(7);
        for i in 0..100 {
            let x = ((i * 37) % 11) as f64 - 5.0;
            env.update(x);
            assert!((env.sum_sq - env.recomputed_sum_sq()).abs() < 1e-9);
        }
    }

    #[test]
    fn eviction_replaces_oldest() {
        let mut env = EnvelopeBuffer::new(2);
        env.update(10.0);
        env.update(0.0);
        // 10 has been evicted: rms of [0, 0] is 0.
        let rms = env.update(0.0);
        assert!(rms.abs() < 1e-12);
    }

    #[test]
    fn reset_clears_everything() {
        let mut env = EnvelopeBuffer::new(3);
        env.update(5.0);
        env.update(5.0);
        env.reset();
        assert!(env.is_empty());
        assert!((env.update(1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_capacity_clamped_to_one() {
        let mut env = EnvelopeBuffer::new(0);
        assert_eq!(env.capacity(), 1);
        assert!((env.update(2.0) - 2.0).abs() < 1e-12);
    }
}
