//! Sanity Watchdog: a 1 Hz supervisor layered on top of the per-tick phase machine. Detects
//! stall, stuck climb/descent, low satellite count and GPS loss, and escalates to `Abort` or
//! `DoNothing` according to the configured [`SanityMode`](crate::config::SanityMode) policy.
//! Ported from the reference firmware's `performSanityChecks()`.

use crate::config::SanityMode;
use crate::failure::Failure;
use crate::phase::Phase;

/// Cross-tick memory for the watchdog; all fields mirror the reference firmware's function
/// `static`s.
#[derive(Clone, Copy, Debug)]
pub struct Watchdog {
    previous_time_micros: u32,
    prev_altitude_cm: f32,
    seconds_low_sats: i8,
    seconds_doing_nothing: i8,
    /// Phase this watchdog last saw, so a *fresh* entry into `Initialize` (coming from some
    /// other phase) can be told apart from staying stuck in `Initialize` tick after tick (e.g.
    /// `NO_HOME_POINT` never clearing). Only the former resets and bails out early; the latter
    /// still needs the failure policy below it to run, or `NO_HOME_POINT` could never escalate.
    last_phase: Phase,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self {
            previous_time_micros: 0,
            prev_altitude_cm: 0.,
            seconds_low_sats: 0,
            seconds_doing_nothing: 0,
            last_phase: Phase::Idle,
        }
    }
}

/// Everything the watchdog reads this tick beyond `phase`/`failure`/`intent.seconds_failing`.
pub struct WatchdogInputs {
    pub now_micros: u32,
    pub current_altitude_cm: f32,
    pub sensor_healthy: bool,
    pub num_sat: u8,
    pub gps_minimum_sats: u8,
    pub crash_recovery_active: bool,
    pub radio_receiving_signal: bool,
    pub velocity_to_home_cm_s: f32,
    pub target_velocity_cm_s: f32,
    pub ascend_rate_cm_s: f32,
    pub descend_rate_cm_s: f32,
    pub mag_in_use: bool,
}

/// What the watchdog asks the caller to do to shared state, beyond returning the new phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct WatchdogEffects {
    pub new_phase: Phase,
    pub new_failure: Failure,
    pub new_seconds_failing: i8,
    /// Set once, the tick the magnetometer gets disabled as a one-shot stall mitigation.
    pub disable_mag: bool,
}

impl Watchdog {
    /// Current low-satellite counter, for the combined RTH debug channel
    /// (`secondsFailing * 100 + secondsLowSats`).
    pub fn seconds_low_sats(&self) -> i8 {
        self.seconds_low_sats
    }

    /// Run one tick of the watchdog. `phase`/`failure`/`seconds_failing` are the current values;
    /// the return value is what they should become.
    pub fn update(
        &mut self,
        phase: Phase,
        failure: Failure,
        seconds_failing: i8,
        cfg_sanity: SanityMode,
        inputs: &WatchdogInputs,
    ) -> WatchdogEffects {
        if phase == Phase::Idle {
            self.last_phase = phase;
            return WatchdogEffects {
                new_phase: phase,
                new_failure: Failure::Healthy,
                new_seconds_failing: seconds_failing,
                disable_mag: false,
            };
        }

        if phase == Phase::Initialize && self.last_phase != Phase::Initialize {
            self.previous_time_micros = inputs.now_micros;
            self.prev_altitude_cm = inputs.current_altitude_cm;
            self.seconds_low_sats = 5;
            self.seconds_doing_nothing = 0;
            self.last_phase = phase;
            return WatchdogEffects {
                new_phase: phase,
                new_failure: failure,
                new_seconds_failing: seconds_failing,
                disable_mag: false,
            };
        }
        self.last_phase = phase;

        let mut failure = failure;
        let mut phase = phase;
        let mut seconds_failing = seconds_failing;
        let mut disable_mag = false;

        let hard_failsafe = !inputs.radio_receiving_signal;
        if !failure.is_healthy() {
            phase = match cfg_sanity {
                SanityMode::On => Phase::Abort,
                SanityMode::FsOnly if hard_failsafe => Phase::Abort,
                SanityMode::FsOnly => Phase::DoNothing,
                SanityMode::Off => Phase::DoNothing,
            };
        }

        if inputs.crash_recovery_active {
            failure = Failure::CrashFlipDetected;
        }
        if !inputs.sensor_healthy {
            failure = Failure::GpsLost;
        }

        let dt_micros = inputs.now_micros.wrapping_sub(self.previous_time_micros);
        if dt_micros < 1_000_000 {
            return WatchdogEffects {
                new_phase: phase,
                new_failure: failure,
                new_seconds_failing: seconds_failing,
                disable_mag: false,
            };
        }
        self.previous_time_micros = inputs.now_micros;

        if phase == Phase::FlyHome {
            seconds_failing += if inputs.velocity_to_home_cm_s < 0.5 * inputs.target_velocity_cm_s {
                1
            } else {
                -1
            };
            seconds_failing = seconds_failing.clamp(0, 20);
            if seconds_failing == 20 {
                if inputs.mag_in_use {
                    disable_mag = true;
                    seconds_failing = 0;
                } else {
                    failure = Failure::Stalled;
                }
            }
        } else if phase == Phase::AttainAlt {
            let climbed = inputs.current_altitude_cm - self.prev_altitude_cm;
            seconds_failing += if climbed > 0.5 * inputs.ascend_rate_cm_s { -1 } else { 1 };
            seconds_failing = seconds_failing.clamp(0, 10);
            if seconds_failing == 10 {
                phase = Phase::Abort;
            }
        } else if phase == Phase::Descent || phase == Phase::Landing {
            let descended = self.prev_altitude_cm - inputs.current_altitude_cm;
            seconds_failing += if descended > 0.5 * inputs.descend_rate_cm_s { -1 } else { 1 };
            seconds_failing = seconds_failing.clamp(0, 10);
            if seconds_failing == 10 {
                phase = Phase::Abort;
            }
        } else if phase == Phase::DoNothing {
            self.seconds_doing_nothing = (self.seconds_doing_nothing + 1).min(10);
            if self.seconds_doing_nothing == 10 {
                phase = Phase::Abort;
            }
        }
        self.prev_altitude_cm = inputs.current_altitude_cm;

        self.seconds_low_sats += if inputs.num_sat < inputs.gps_minimum_sats { 1 } else { -1 };
        self.seconds_low_sats = self.seconds_low_sats.clamp(0, 10);
        if self.seconds_low_sats == 10 {
            failure = Failure::LowSats;
        }

        WatchdogEffects {
            new_phase: phase,
            new_failure: failure,
            new_seconds_failing: seconds_failing,
            disable_mag,
        }
    }
}
