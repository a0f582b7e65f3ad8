//! Noise gate: level-detecting trigger plus a gain stage
//!
//! The trigger follows the signal power with a one-pole smoother and
//! produces a per-sample gain reduction in dB. Below the threshold the
//! target reduction grows quadratically with the distance to the
//! threshold. The gain stage only converts that reduction to amplitude.

/// Lowest level the detector reports (dB)
const MINIMUM_LOUDNESS_DB: f64 = -120.0;
const MINIMUM_LOUDNESS_POWER: f64 = 1e-12;
const MAXIMUM_LOUDNESS_POWER: f64 = 1000.0;

/// Trigger timing and shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateParams {
    /// Level detector time constant (s)
    pub time: f64,
    /// Threshold (dB)
    pub threshold: f64,
    /// Quadratic reduction slope
    pub ratio: f64,
    pub open_time: f64,
    pub hold_time: f64,
    pub close_time: f64,
}

impl GateParams {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            time: 0.01,
            threshold: -80.0,
            ratio: 0.1,
            open_time: 0.005,
            hold_time: 0.0,
            close_time: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// Fully open; counting time spent below threshold
    Holding,
    /// Gain reduction is moving toward its target
    Moving,
}

/// Level detector and gain-reduction computer
#[derive(Debug, Clone)]
pub struct GateTrigger {
    params: GateParams,
    sample_rate: f64,
    level: f64,
    state: TriggerState,
    last_reduction_db: f64,
    time_held: f64,
}

impl GateTrigger {
    pub fn new(sample_rate: f64) -> Self {
        let mut trigger = Self {
            params: GateParams::default(),
            sample_rate,
            level: MINIMUM_LOUDNESS_POWER,
            state: TriggerState::Moving,
            last_reduction_db: 0.0,
            time_held: 0.0,
        };
        trigger.reset();
        trigger
    }

    pub fn set_params(&mut self, params: GateParams) {
        self.params = params;
    }

    pub fn params(&self) -> &GateParams {
        &self.params
    }

    /// Change rate; state is reset only when the rate actually changes
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.reset();
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Start closed
    pub fn reset(&mut self) {
        self.level = MINIMUM_LOUDNESS_POWER;
        self.state = TriggerState::Moving;
        self.last_reduction_db = self.max_reduction_db();
        self.time_held = 0.0;
    }

    fn reduction_for(&self, level_db: f64) -> f64 {
        let threshold = self.params.threshold;
        if level_db < threshold {
            let below = level_db - threshold;
            -self.params.ratio * below * below
        } else {
            0.0
        }
    }

    fn max_reduction_db(&self) -> f64 {
        self.reduction_for(MINIMUM_LOUDNESS_DB)
    }

    /// Compute per-sample gain reduction (dB) for `input`
    ///
    /// Writes `min(input.len(), reduction_db.len())` values.
    pub fn process(&mut self, input: &[f32], reduction_db: &mut [f32]) {
        let alpha = 0.5_f64.powf(1.0 / (self.params.time * self.sample_rate));
        let beta = 1.0 - alpha;
        let threshold = self.params.threshold;
        let dt = 1.0 / self.sample_rate;
        let max_hold = self.params.hold_time;
        let max_reduction = self.max_reduction_db();
        let d_open = -max_reduction / self.params.open_time * dt;
        let d_close = max_reduction / self.params.close_time * dt;

        for (x, out) in input.iter().zip(reduction_db.iter_mut()) {
            let x = *x as f64;
            self.level = (alpha * self.level + beta * x * x)
                .clamp(MINIMUM_LOUDNESS_POWER, MAXIMUM_LOUDNESS_POWER);
            let level_db = 10.0 * self.level.log10();

            match self.state {
                TriggerState::Holding => {
                    self.last_reduction_db = 0.0;
                    if level_db < threshold {
                        self.time_held += dt;
                        if self.time_held >= max_hold {
                            self.state = TriggerState::Moving;
                        }
                    } else {
                        self.time_held = 0.0;
                    }
                }
                TriggerState::Moving => {
                    let target = self.reduction_for(level_db);
                    if target > self.last_reduction_db {
                        let step = (0.5 * (target - self.last_reduction_db)).clamp(0.0, d_open);
                        self.last_reduction_db += step;
                        if self.last_reduction_db >= 0.0 {
                            self.last_reduction_db = 0.0;
                            self.state = TriggerState::Holding;
                            self.time_held = 0.0;
                        }
                    } else if target < self.last_reduction_db {
                        let step = (0.5 * (target - self.last_reduction_db)).clamp(d_close, 0.0);
                        self.last_reduction_db += step;
                        if self.last_reduction_db < max_reduction {
                            self.last_reduction_db = max_reduction;
                        }
                    }
                }
            }
            *out = self.last_reduction_db as f32;
        }
    }
}

/// Applies a trigger's gain reduction to a signal
#[derive(Debug, Clone, Copy, Default)]
pub struct GateGain;

impl GateGain {
    #[inline]
    pub fn apply(&self, buffer: &mut [f32], reduction_db: &[f32]) {
        for (sample, reduction) in buffer.iter_mut().zip(reduction_db) {
            *sample *= 10.0_f32.powf(*reduction / 20.0);
        }
    }
}
