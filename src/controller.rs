//! Attitude & Throttle Controller: three cascaded loops (yaw P, pitch-from-velocity PID, and
//! throttle-from-altitude PID+jerk) that run every tick but only move their targets forward on
//! a new GPS sample. Ported literally from the reference firmware's `rescueAttainPosition()`.

use crate::{config::Config, intent::Intent, phase::Phase, sensor::SensorSnapshot};

const MAX_YAW_RATE_DEG_S: f32 = 90.;
const MAX_ITERM_VELOCITY: f32 = 1000.;
const MAX_ITERM_THROTTLE: f32 = 200.;

/// Owned PID history, replacing the reference firmware's function-local `static` variables.
/// Reset on entry to `Initialize`; persists across ticks otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerMemory {
    previous_velocity_error: f32,
    velocity_i: f32,
    previous_velocity_d: f32,
    previous_pitch_adjustment: f32,
    previous_altitude_error: f32,
    throttle_i: f32,
    previous_throttle_d: f32,
    previous_throttle_d_val: f32,
    previous_throttle_d2: f32,
}

impl ControllerMemory {
    /// Reset all controller history. Called on entry to `Initialize`; a subsequent tick with
    /// zero error then produces P = I = D = 0.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn velocity_i(&self) -> f32 {
        self.velocity_i
    }

    pub fn throttle_i(&self) -> f32 {
        self.throttle_i
    }
}

/// What the controller produces each tick, read by the outer mixer/PID subsystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerOutputs {
    /// Degrees * 100, summed into the angle-mode pitch target.
    pub pitch_bias_deg100: f32,
    /// Degrees * 100, summed into the angle-mode roll target.
    pub roll_bias_deg100: f32,
    /// Degrees/sec.
    pub yaw_rate_deg_s: f32,
    /// PWM microseconds, clamped to `[throttle_min, throttle_max]`.
    pub throttle_pwm: f32,
}

/// Debug channels mirroring the reference firmware's `DEBUG_SET` calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerDebug {
    pub heading_yaw_rate_deg_s_x10: f32,
    pub heading_roll_deg100: f32,
    pub velocity_p: f32,
    pub velocity_d: f32,
    pub throttle_p: f32,
    pub throttle_d: f32,
}

/// Run the controller for one tick. `new_gps_data` gates whether targets advance; outside a new
/// sample the previous outputs remain the caller's responsibility to hold (this function simply
/// returns `None` to signal "no change").
#[allow(clippy::too_many_arguments)]
pub fn run(
    phase: Phase,
    intent: &Intent,
    sensor: &SensorSnapshot,
    cfg: &Config,
    mem: &mut ControllerMemory,
    cos_tilt: f32,
    pilot_throttle_pwm: f32,
    yaw_control_reversed: bool,
    new_gps_data: bool,
) -> Option<(ControllerOutputs, ControllerDebug)> {
    match phase {
        Phase::Idle => {
            return Some((
                ControllerOutputs {
                    pitch_bias_deg100: 0.,
                    roll_bias_deg100: 0.,
                    yaw_rate_deg_s: 0.,
                    throttle_pwm: pilot_throttle_pwm,
                },
                ControllerDebug::default(),
            ));
        }
        Phase::Initialize => {
            mem.reset();
            return None;
        }
        Phase::DoNothing => {
            return Some((
                ControllerOutputs {
                    pitch_bias_deg100: 0.,
                    roll_bias_deg100: 0.,
                    yaw_rate_deg_s: 0.,
                    throttle_pwm: cfg.throttle_hover,
                },
                ControllerDebug::default(),
            ));
        }
        _ => {}
    }

    if !new_gps_data {
        return None;
    }

    let k = sensor.gps_data_interval_s * 10.0;

    // --- Yaw + roll mix ---
    let mut rescue_yaw =
        (sensor.error_angle_deg * cfg.yaw_p * 0.1).clamp(-MAX_YAW_RATE_DEG_S, MAX_YAW_RATE_DEG_S);

    let roll_attenuator = (1.0 - rescue_yaw.abs() * 0.01).clamp(0.0, 1.0);
    let roll_adjustment = -rescue_yaw * cfg.roll_mix * roll_attenuator;
    let roll_bias_deg100 = roll_adjustment.clamp(
        -intent.roll_angle_limit_deg * 100.0,
        intent.roll_angle_limit_deg * 100.0,
    );

    if yaw_control_reversed {
        rescue_yaw = -rescue_yaw;
    }
    if !intent.update_yaw {
        rescue_yaw = 0.0;
    }

    let debug = ControllerDebug {
        heading_yaw_rate_deg_s_x10: rescue_yaw * 10.0,
        heading_roll_deg100: roll_bias_deg100,
        ..Default::default()
    };

    // --- Pitch via velocity PID ---
    let velocity_target_limiter = ((60.0 - sensor.abs_error_angle_deg) / 60.0).clamp(0.0, 1.0);
    let velocity_error =
        intent.target_velocity_cm_s * velocity_target_limiter - sensor.velocity_to_home_cm_s;

    let velocity_p = velocity_error * cfg.vel_p;

    mem.velocity_i += 0.01 * cfg.vel_i * velocity_error * k;
    // The reference firmware's `velocityI *= targetVelocityCmS / targetVelocityCmS` divides two
    // `uint16_t`s: plain integer division, where `0 / 0` (Cortex-M's UDIV) returns 0 rather than
    // trapping, and `x / x` for any nonzero `x` is exactly 1. Net effect: zero `velocityI`
    // whenever the target velocity is 0 (throughout AttainAlt, pre-unlock Rotate, and
    // zero-velocity Landing), otherwise leave it unchanged. `target_velocity_cm_s` here is `f32`,
    // so the same division would produce NaN at zero target velocity instead of 0 -- ported the
    // integer division's actual effect rather than its literal syntax.
    if intent.target_velocity_cm_s == 0.0 {
        mem.velocity_i = 0.0;
    }
    mem.velocity_i = mem.velocity_i.clamp(-MAX_ITERM_VELOCITY, MAX_ITERM_VELOCITY);

    let mut velocity_d = (velocity_error - mem.previous_velocity_error) / k;
    mem.previous_velocity_error = velocity_error;
    velocity_d = mem.previous_velocity_d + sensor.filter_k * (velocity_d - mem.previous_velocity_d);
    mem.previous_velocity_d = velocity_d;
    let velocity_d = velocity_d * cfg.vel_d;

    let mut pitch_adjustment = velocity_p + mem.velocity_i + velocity_d;
    let pitch_adjustment_delta = pitch_adjustment - mem.previous_pitch_adjustment;
    if pitch_adjustment_delta > sensor.max_pitch_step {
        pitch_adjustment = mem.previous_pitch_adjustment + sensor.max_pitch_step;
    } else if pitch_adjustment_delta < -sensor.max_pitch_step {
        pitch_adjustment = mem.previous_pitch_adjustment - sensor.max_pitch_step;
    }
    let moving_avg_pitch = 0.5 * (mem.previous_pitch_adjustment + pitch_adjustment);
    mem.previous_pitch_adjustment = pitch_adjustment;
    let pitch_adjustment = moving_avg_pitch;

    let pitch_bias_deg100 = pitch_adjustment.clamp(
        -intent.pitch_angle_limit_deg * 100.0,
        intent.pitch_angle_limit_deg * 100.0,
    );

    // --- Throttle via altitude PID + jerk ---
    let altitude_error = (intent.target_altitude_cm - sensor.current_altitude_cm) * 0.01;

    let throttle_p = cfg.throttle_p * altitude_error;

    mem.throttle_i += 0.01 * cfg.throttle_i * altitude_error * k;
    mem.throttle_i = mem.throttle_i.clamp(-MAX_ITERM_THROTTLE, MAX_ITERM_THROTTLE);

    let mut throttle_d = (altitude_error - mem.previous_altitude_error) / k;
    mem.previous_altitude_error = altitude_error;

    let jerk = 2.0 * (throttle_d - mem.previous_throttle_d);
    mem.previous_throttle_d = throttle_d;
    throttle_d += jerk;

    let moving_avg_throttle_d = 0.5 * (mem.previous_throttle_d_val + throttle_d);
    mem.previous_throttle_d_val = throttle_d;
    throttle_d = moving_avg_throttle_d;
    throttle_d = mem.previous_throttle_d2 + sensor.filter_k * (throttle_d - mem.previous_throttle_d2);
    mem.previous_throttle_d2 = throttle_d;

    let throttle_d = 10.0 * cfg.throttle_d * throttle_d;

    let tilt_adjustment = (1.0 - cos_tilt) * (cfg.throttle_hover - 1000.0);

    let throttle_adjustment = throttle_p + mem.throttle_i + throttle_d + tilt_adjustment;
    let throttle_pwm =
        (cfg.throttle_hover + throttle_adjustment).clamp(cfg.throttle_min, cfg.throttle_max);

    let debug = ControllerDebug {
        velocity_p,
        velocity_d,
        throttle_p,
        throttle_d,
        ..debug
    };

    Some((
        ControllerOutputs {
            pitch_bias_deg100,
            roll_bias_deg100,
            yaw_rate_deg_s: rescue_yaw,
            throttle_pwm,
        },
        debug,
    ))
}

/// Rescale a PWM throttle value to `[0, 1]` for the mixer, as `gpsRescueGetThrottle()` does.
pub fn normalize_throttle(throttle_pwm: f32, min_check: f32, pwm_range_min: f32, pwm_range_max: f32) -> f32 {
    let lo = min_check.max(pwm_range_min);
    let scaled = (throttle_pwm - lo) / (pwm_range_max - lo);
    scaled.clamp(0.0, 1.0)
}
