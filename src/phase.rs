//! Phase state machine. A `Phase` value drives which control authorities and targets apply;
//! [`crate::intent::Intent`] fields are set on entry to each phase.

use num_enum::IntoPrimitive;

use crate::failure::Failure;
use crate::intent::Intent;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format, IntoPrimitive)]
#[repr(u8)]
pub enum Phase {
    Idle,
    Initialize,
    AttainAlt,
    Rotate,
    FlyHome,
    Descent,
    Landing,
    Abort,
    Complete,
    DoNothing,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

impl Phase {
    /// True from the moment a rescue starts initializing through to the end of landing --
    /// the range the original firmware range-checks to decide whether to force the
    /// magnetometer off (`rescueState.phase >= RESCUE_INITIALIZE && <= RESCUE_LANDING`).
    pub fn is_in_rescue(self) -> bool {
        let v: u8 = self.into();
        let lo: u8 = Self::Initialize.into();
        let hi: u8 = Self::Landing.into();
        (lo..=hi).contains(&v)
    }
}

/// Below this distance from home, a rescue switches directly into landing instead of climbing.
const MIN_DESCENT_DIST_M: f32 = 10.;

/// What's read by the Phase Machine beyond the sensor snapshot and config.
pub struct PhaseInputs {
    pub armed: bool,
    pub altitude_offset_applied: bool,
    pub gps_fix_home: bool,
    pub new_gps_data: bool,
}

/// Side effects the Phase Machine asks the dispatcher to carry out this tick, beyond mutating
/// `phase`/`intent` in place.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhaseEffects {
    pub disarm_requested: bool,
    pub lock_arming_requested: bool,
}

/// Run the Phase Machine for one tick. Mutates `intent` in place and returns the phase to
/// transition to, plus any disarm/arming-lock side effects. `sensor_agg` is mutated for the
/// max-altitude bookkeeping that only happens in `Idle`.
pub fn run(
    phase: Phase,
    intent: &mut Intent,
    sensor: &crate::sensor::SensorSnapshot,
    sensor_agg: &mut crate::sensor::SensorAggregator,
    cfg: &crate::config::Config,
    failure: &mut Failure,
    inputs: &PhaseInputs,
) -> (Phase, PhaseEffects) {
    // Integer division, widened after truncation, matching the original's
    // `uint8_t halfAngle = gpsRescueConfig()->angle / 2;` -- for an odd configured angle this
    // truncates to a whole degree rather than landing on a `.5` value.
    let half_angle = (cfg.angle_deg / 2) as f32;
    let mut effects = PhaseEffects::default();

    let new_phase = match phase {
        Phase::Idle => {
            idle_tasks(intent, sensor, sensor_agg, cfg, inputs);
            Phase::Idle
        }

        Phase::Initialize => {
            if !inputs.gps_fix_home {
                *failure = Failure::NoHomePoint;
                Phase::Initialize
            } else if sensor.distance_to_home_m < cfg.min_rescue_dth_m {
                intent.target_altitude_cm = sensor.current_altitude_cm - sensor.descend_step_cm;
                Phase::Landing
            } else {
                intent.seconds_failing = 0;
                intent.started_low = sensor.current_altitude_cm <= intent.return_altitude_cm;
                intent.update_yaw = true;
                intent.target_velocity_cm_s = 0.;
                intent.pitch_angle_limit_deg = half_angle;
                intent.roll_angle_limit_deg = 0.;
                Phase::AttainAlt
            }
        }

        Phase::AttainAlt => {
            let mut next = Phase::AttainAlt;
            if inputs.new_gps_data {
                if intent.started_low {
                    if intent.target_altitude_cm < intent.return_altitude_cm {
                        intent.target_altitude_cm += sensor.ascend_step_cm;
                    } else if sensor.current_altitude_cm > intent.return_altitude_cm {
                        intent.target_altitude_cm = intent.return_altitude_cm;
                        next = Phase::Rotate;
                    }
                } else if intent.target_altitude_cm > intent.return_altitude_cm {
                    intent.target_altitude_cm -= sensor.descend_step_cm;
                } else if sensor.current_altitude_cm < intent.return_altitude_cm {
                    intent.target_altitude_cm = intent.return_altitude_cm;
                    next = Phase::Rotate;
                }
            }
            next
        }

        Phase::Rotate => {
            let mut next = Phase::Rotate;
            if inputs.new_gps_data && sensor.abs_error_angle_deg < 60.0 {
                intent.target_velocity_cm_s = cfg.rescue_groundspeed_cm_s;
                intent.pitch_angle_limit_deg = cfg.angle_deg as f32;
                if sensor.abs_error_angle_deg < 15.0 {
                    next = Phase::FlyHome;
                    intent.seconds_failing = 0;
                    intent.roll_angle_limit_deg = cfg.angle_deg as f32;
                }
            }
            next
        }

        Phase::FlyHome => {
            if inputs.new_gps_data && sensor.distance_to_home_m <= intent.descent_distance_m {
                intent.seconds_failing = 0;
                Phase::Descent
            } else {
                Phase::FlyHome
            }
        }

        Phase::Descent => {
            let mut next = Phase::Descent;
            if inputs.new_gps_data {
                let target_landing_altitude_cm = cfg.target_landing_altitude_m * 100.0;
                if sensor.current_altitude_cm < target_landing_altitude_cm {
                    next = Phase::Landing;
                    intent.target_altitude_cm -= sensor.descend_step_cm;
                    intent.seconds_failing = 0;
                    intent.target_velocity_cm_s = 0.;
                    intent.pitch_angle_limit_deg = half_angle;
                    intent.roll_angle_limit_deg = 0.;
                } else {
                    let distance_to_landing_area_m = (sensor.distance_to_home_m - 2.0).max(0.0);
                    let proximity =
                        (distance_to_landing_area_m / intent.descent_distance_m).clamp(0.0, 1.0);
                    intent.target_altitude_cm -= sensor.descend_step_cm * (1.0 + proximity);
                    intent.target_velocity_cm_s = cfg.rescue_groundspeed_cm_s * proximity;
                    intent.roll_angle_limit_deg = cfg.angle_deg as f32 * proximity;
                }
            }
            next
        }

        Phase::Landing => {
            if inputs.new_gps_data {
                intent.target_altitude_cm -= sensor.descend_step_cm;
            }
            if sensor.acc_magnitude_g > 2.0 {
                effects.disarm_requested = true;
                effects.lock_arming_requested = true;
                Phase::Complete
            } else {
                Phase::Landing
            }
        }

        Phase::Complete => Phase::Idle,

        Phase::Abort => {
            effects.disarm_requested = true;
            effects.lock_arming_requested = true;
            Phase::Idle
        }

        Phase::DoNothing => Phase::DoNothing,
    };

    (new_phase, effects)
}

/// Bookkeeping that runs in `Idle`: max-altitude tracking and keeping the return
/// altitude/descent distance current, so they're valid the instant a rescue starts.
fn idle_tasks(
    intent: &mut Intent,
    sensor: &crate::sensor::SensorSnapshot,
    sensor_agg: &mut crate::sensor::SensorAggregator,
    cfg: &crate::config::Config,
    inputs: &PhaseInputs,
) {
    if !inputs.armed {
        sensor_agg.reset_max_altitude();
        return;
    }
    if !inputs.altitude_offset_applied {
        return;
    }

    sensor_agg.note_max_altitude(sensor.current_altitude_cm);

    if inputs.new_gps_data {
        intent.target_altitude_cm = sensor.current_altitude_cm;
        intent.descent_distance_m = sensor
            .distance_to_home_m
            .clamp(MIN_DESCENT_DIST_M, cfg.descent_distance_m);

        let initial_altitude_cm = cfg.initial_altitude_m * 100.0;
        let rescue_altitude_buffer_cm = cfg.rescue_altitude_buffer_m * 100.0;
        intent.return_altitude_cm = match cfg.altitude_mode {
            crate::config::AltitudeMode::FixedAlt => initial_altitude_cm,
            crate::config::AltitudeMode::CurrentAlt => {
                sensor.current_altitude_cm + rescue_altitude_buffer_cm
            }
            crate::config::AltitudeMode::MaxAlt => {
                sensor_agg.max_altitude_cm() + rescue_altitude_buffer_cm
            }
        };
    }
}
