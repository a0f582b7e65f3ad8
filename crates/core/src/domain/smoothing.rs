//! Linear parameter smoothing
//!
//! Gains and EQ amounts are never applied as steps. A [`LinearSmoothedValue`]
//! ramps from its current value to a new target over a fixed number of
//! samples, computed from the sample rate at `reset` time.

/// A value that ramps linearly toward its target
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    countdown: u32,
    steps_to_target: u32,
}

impl LinearSmoothedValue {
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            countdown: 0,
            steps_to_target: 0,
        }
    }

    /// Set the ramp length and snap to the current target
    pub fn reset(&mut self, sample_rate: f64, ramp_seconds: f64) {
        self.steps_to_target = (ramp_seconds * sample_rate).floor().max(0.0) as u32;
        self.set_current_and_target(self.target);
    }

    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        if self.steps_to_target == 0 {
            self.set_current_and_target(target);
            return;
        }
        self.target = target;
        self.countdown = self.steps_to_target;
        self.step = (self.target - self.current) / self.countdown as f32;
    }

    pub fn set_current_and_target(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.countdown = 0;
        self.step = 0.0;
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.countdown == 0 {
            return self.target;
        }
        self.countdown -= 1;
        if self.countdown > 0 {
            self.current += self.step;
        } else {
            self.current = self.target;
        }
        self.current
    }

    /// Advance by `samples` steps without producing values
    pub fn skip(&mut self, samples: usize) -> f32 {
        if samples as u64 >= self.countdown as u64 {
            self.set_current_and_target(self.target);
            return self.target;
        }
        self.current += self.step * samples as f32;
        self.countdown -= samples as u32;
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_smoothing(&self) -> bool {
        self.countdown > 0
    }
}

impl Default for LinearSmoothedValue {
    fn default() -> Self {
        Self::new(0.0)
    }
}
