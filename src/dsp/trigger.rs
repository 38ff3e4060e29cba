//! Rising-edge trigger with refractory debounce.
//!
//! Two states per device: idle and armed. The trigger fires at the onset
//! of a rise rather than waiting to confirm a local maximum, trading a
//! small risk of firing on a steep-but-small rise for lower latency.
//! Re-arming (armed back to idle once the envelope falls under threshold)
//! is decoupled from the refractory counter, which only gates re-firing.

/// Details of a fired trigger, fed into the emitted event.
#[derive(Debug, Clone, Copy)]
pub struct Firing {
    pub baseline: f64,
    pub threshold: f64,
    pub slope: f64,
    pub snr: f64,
}

/// Per-device trigger state machine.
#[derive(Debug, Clone)]
pub struct EdgeTrigger {
    prev_env: f64,
    prev_prev_env: f64,
    samples_since_trigger: u64,
    triggered: bool,
    initial_refractory: u64,
}

impl EdgeTrigger {
    /// `refractory_samples` seeds the counter so the first impulse after
    /// warm-up may fire immediately.
    pub fn new(refractory_samples: u64) -> Self {
        Self {
            prev_env: 0.0,
            prev_prev_env: 0.0,
            samples_since_trigger: refractory_samples,
            triggered: false,
            initial_refractory: refractory_samples,
        }
    }

    /// Evaluate one tick. Fires (idle -> armed) only when the envelope
    /// exceeds the adaptive threshold, the rise is steep or accelerating,
    /// and the refractory period has elapsed. `prev_env` history updates
    /// unconditionally.
    pub fn update(
        &mut self,
        env: f64,
        baseline: f64,
        std_floored: f64,
        k_eff: f64,
        refractory_samples: u64,
    ) -> Option<Firing> {
        self.samples_since_trigger = self.samples_since_trigger.saturating_add(1);

        let threshold = baseline + k_eff * std_floored;
        let slope = env - self.prev_env;
        let prev_slope = self.prev_env - self.prev_prev_env;

        let mut fired = None;
        if !self.triggered {
            let above = env > threshold;
            let steep = slope > 0.3 * (threshold - baseline);
            let accelerating = slope > 1.5 * prev_slope;
            let rested = self.samples_since_trigger >= refractory_samples;
            if above && (steep || accelerating) && rested {
                self.triggered = true;
                self.samples_since_trigger = 0;
                fired = Some(Firing {
                    baseline,
                    threshold,
                    slope,
                    snr: (env - baseline) / std_floored,
                });
            }
        } else if env <= threshold {
            // Disarm as soon as the envelope falls back under threshold,
            // even inside the refractory window.
            self.triggered = false;
        }

        self.prev_prev_env = self.prev_env;
        self.prev_env = env;
        fired
    }

    pub fn is_armed(&self) -> bool {
        self.triggered
    }

    pub fn samples_since_trigger(&self) -> u64 {
        self.samples_since_trigger
    }

    /// Restore construction-time state.
    pub fn reset(&mut self) {
        self.prev_env = 0.0;
        self.prev_prev_env = 0.0;
        self.samples_since_trigger = self.initial_refractory;
        self.triggered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: f64 = 4.0;
    const STD: f64 = 0.05;
    const REFRACTORY: u64 = 10;

    fn quiet(trigger: &mut EdgeTrigger, ticks: usize) {
        for _ in 0..ticks {
            assert!(trigger.update(0.0, 0.0, STD, K, REFRACTORY).is_none());
        }
    }

    #[test]
    fn fires_once_on_sustained_impulse() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        quiet(&mut trigger, 20);

        // Envelope jumps well above threshold (0.2) and stays there.
        let mut fires = 0;
        for _ in 0..8 {
            if trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some() {
                fires += 1;
            }
        }
        assert_eq!(fires, 1, "latch must suppress repeat fires");
        assert!(trigger.is_armed());
    }

    #[test]
    fn rearms_after_envelope_falls() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        quiet(&mut trigger, 20);

        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
        // Fall back under threshold: disarm without waiting for refractory.
        trigger.update(0.0, 0.0, STD, K, REFRACTORY);
        assert!(!trigger.is_armed());
    }

    #[test]
    fn refractory_blocks_second_fire() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        quiet(&mut trigger, 20);

        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
        trigger.update(0.0, 0.0, STD, K, REFRACTORY); // disarm
        // Second impulse 2 ticks after the first: inside refractory.
        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_none());
    }

    #[test]
    fn fires_again_after_refractory() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        quiet(&mut trigger, 20);

        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
        quiet(&mut trigger, REFRACTORY as usize + 2);
        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
    }

    #[test]
    fn slow_drift_above_threshold_does_not_fire() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        // Envelope creeps up by tiny steps: above threshold eventually but
        // with slope below both the absolute and acceleration conditions.
        let mut env = 0.0;
        let mut fires = 0;
        for _ in 0..2000 {
            env += 0.0001;
            if trigger.update(env, 0.0, STD, K, REFRACTORY).is_some() {
                fires += 1;
            }
        }
        assert_eq!(fires, 0);
    }

    #[test]
    fn accelerating_rise_fires_without_steep_slope() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        quiet(&mut trigger, 5);
        // threshold = 0.2, steep condition needs slope > 0.06. Climb at
        // 0.03/tick below threshold, then cross with slope 0.05: under the
        // steep cutoff but more than 1.5x the previous slope.
        for &env in &[0.10, 0.13, 0.16, 0.19] {
            assert!(trigger.update(env, 0.0, STD, K, REFRACTORY).is_none());
        }
        let fired = trigger.update(0.24, 0.0, STD, K, REFRACTORY);
        assert!(fired.is_some(), "acceleration path should fire");
    }

    #[test]
    fn first_impulse_fires_without_waiting() {
        // Counter is seeded with the refractory period.
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
    }

    #[test]
    fn reset_restores_seeded_counter() {
        let mut trigger = EdgeTrigger::new(REFRACTORY);
        quiet(&mut trigger, 3);
        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
        trigger.reset();
        assert!(!trigger.is_armed());
        assert!(trigger.update(1.0, 0.0, STD, K, REFRACTORY).is_some());
    }
}
