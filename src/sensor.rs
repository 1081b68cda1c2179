//! Sensor Aggregator: samples the external collaborators each tick, and derives the
//! GPS-interval-dependent gains, distances, bearings, heading error and vertical-velocity
//! steps that the rest of the module runs on.

use num_traits::float::Float;

/// GPS-specific readings, refreshed only when [`TickInputs::new_gps_data`] is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct GpsInputs {
    pub healthy: bool,
    pub ground_speed_cm_s: f32,
    pub num_sat: u8,
    pub has_3d_fix: bool,
    pub distance_to_home_cm: f32,
    /// Degrees * 10, as delivered by the GPS driver.
    pub direction_to_home_deg10: f32,
}

/// Raw per-axis accelerometer readings, already scaled to g.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccelInputs {
    pub x_g: f32,
    pub y_g: f32,
    pub z_g: f32,
}

/// Everything the Sensor Aggregator reads from external collaborators in a single tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickInputs {
    pub armed: bool,
    pub gps_fix_home: bool,
    pub altitude_offset_applied: bool,
    /// Estimated altitude from the barometer/altitude estimator, in cm.
    pub estimated_altitude_cm: f32,
    /// Attitude yaw, degrees * 10.
    pub yaw_deg10: f32,
    pub gps: GpsInputs,
    pub accel: AccelInputs,
    /// Monotonic microsecond clock, used to derive the GPS sample interval.
    pub now_micros: u32,
    /// Edge set by the GPS driver when a new fix has been processed this tick.
    pub new_gps_data: bool,
}

fn normalize180(deg: f32) -> f32 {
    if deg <= -180. {
        deg + 360.
    } else if deg > 180. {
        deg - 360.
    } else {
        deg
    }
}

/// PT1 (single-pole) low-pass filter gain for a given cutoff and sample interval.
/// `gain = dt / (dt + 1 / (2*pi*cutoff))`.
pub fn pt1_filter_gain(cutoff_hz: f32, dt_s: f32) -> f32 {
    const TAU: f32 = core::f32::consts::TAU;
    let rc = 1. / (TAU * cutoff_hz);
    dt_s / (dt_s + rc)
}

/// A refreshed view of the sensors, as seen by the rest of the module this tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct SensorSnapshot {
    pub current_altitude_cm: f32,
    /// Monotone non-decreasing while armed and not in a rescue; 0 while disarmed.
    pub max_altitude_cm: f32,
    pub distance_to_home_m: f32,
    pub ground_speed_cm_s: f32,
    pub direction_to_home_deg: f32,
    /// (-180, 180].
    pub error_angle_deg: f32,
    pub abs_error_angle_deg: f32,
    /// Towards home is positive.
    pub velocity_to_home_cm_s: f32,
    /// Clamped to [0.01, 1.0] seconds.
    pub gps_data_interval_s: f32,
    pub filter_k: f32,
    pub ascend_step_cm: f32,
    pub descend_step_cm: f32,
    pub max_pitch_step: f32,
    /// Only refreshed while in `Landing`; magnitude of the raw accelerometer vector, in g.
    pub acc_magnitude_g: f32,
    pub healthy: bool,
    pub num_sat: u8,
    pub has_3d_fix: bool,
    pub gps_fix_home: bool,
}

/// The subset of [`SensorSnapshot`] that's only refreshed on a new GPS sample. Held by
/// [`SensorAggregator`] and carried forward untouched on ticks with no new sample, exactly as
/// the reference firmware's `rescueState.sensor` is one persistent struct whose GPS-rate fields
/// `sensorUpdate()` simply never writes to when `!newGPSData` (not a reset to zero).
#[derive(Clone, Copy, Debug, Default)]
struct GpsDerivedFields {
    distance_to_home_m: f32,
    ground_speed_cm_s: f32,
    direction_to_home_deg: f32,
    error_angle_deg: f32,
    abs_error_angle_deg: f32,
    velocity_to_home_cm_s: f32,
    gps_data_interval_s: f32,
    filter_k: f32,
    ascend_step_cm: f32,
    descend_step_cm: f32,
    max_pitch_step: f32,
}

/// Owns the cross-tick memory the aggregator needs: previous GPS sample time and distance, the
/// monotone max altitude, and the last computed GPS-rate fields (so a tick with no new GPS
/// sample reads stale-but-correct values instead of zeros).
#[derive(Clone, Copy, Debug, Default)]
pub struct SensorAggregator {
    prev_sample_time_micros: u32,
    prev_distance_to_home_cm: f32,
    max_altitude_cm: f32,
    last_gps_fields: GpsDerivedFields,
}

impl SensorAggregator {
    /// Reset the monotone max-altitude tracker, e.g. on disarm.
    pub fn reset_max_altitude(&mut self) {
        self.max_altitude_cm = 0.;
    }

    pub fn max_altitude_cm(&self) -> f32 {
        self.max_altitude_cm
    }

    /// Track the highest altitude seen. Called from `idleTasks`-equivalent phase-machine code
    /// while armed and not rescuing; not on every tick.
    pub fn note_max_altitude(&mut self, current_altitude_cm: f32) {
        self.max_altitude_cm = self.max_altitude_cm.max(current_altitude_cm);
    }

    /// Refresh the snapshot for this tick. `in_landing` controls whether the accelerometer
    /// magnitude is computed (it's only needed, and only cheap enough, during landing).
    /// `ascend_rate_cm_s`/`descend_rate_cm_s` come from [`crate::config::Config`].
    pub fn update(
        &mut self,
        inputs: &TickInputs,
        in_landing: bool,
        ascend_rate_cm_s: f32,
        descend_rate_cm_s: f32,
    ) -> SensorSnapshot {
        let mut snap = SensorSnapshot {
            current_altitude_cm: inputs.estimated_altitude_cm,
            max_altitude_cm: self.max_altitude_cm,
            healthy: inputs.gps.healthy,
            num_sat: inputs.gps.num_sat,
            has_3d_fix: inputs.gps.has_3d_fix,
            gps_fix_home: inputs.gps_fix_home,
            ..Default::default()
        };

        if in_landing {
            let a = &inputs.accel;
            snap.acc_magnitude_g =
                (a.x_g * a.x_g + a.y_g * a.y_g + a.z_g * a.z_g).sqrt();
        }

        if !inputs.new_gps_data {
            // GPS-rate fields hold their last computed value between samples, same as the
            // reference firmware's persistent `rescueState.sensor` struct.
            let last = &self.last_gps_fields;
            snap.distance_to_home_m = last.distance_to_home_m;
            snap.ground_speed_cm_s = last.ground_speed_cm_s;
            snap.direction_to_home_deg = last.direction_to_home_deg;
            snap.error_angle_deg = last.error_angle_deg;
            snap.abs_error_angle_deg = last.abs_error_angle_deg;
            snap.velocity_to_home_cm_s = last.velocity_to_home_cm_s;
            snap.gps_data_interval_s = last.gps_data_interval_s;
            snap.filter_k = last.filter_k;
            snap.ascend_step_cm = last.ascend_step_cm;
            snap.descend_step_cm = last.descend_step_cm;
            snap.max_pitch_step = last.max_pitch_step;
            return snap;
        }

        snap.distance_to_home_m = inputs.gps.distance_to_home_cm / 100.;
        snap.ground_speed_cm_s = inputs.gps.ground_speed_cm_s;
        snap.direction_to_home_deg = inputs.gps.direction_to_home_deg10 * 0.1;

        let raw_error = (inputs.yaw_deg10 - inputs.gps.direction_to_home_deg10) * 0.1;
        snap.error_angle_deg = normalize180(raw_error);
        snap.abs_error_angle_deg = snap.error_angle_deg.abs();

        let interval_us = inputs.now_micros.wrapping_sub(self.prev_sample_time_micros);
        snap.gps_data_interval_s = (interval_us as f32 * 1e-6).clamp(0.01, 1.0);
        self.prev_sample_time_micros = inputs.now_micros;

        snap.filter_k = pt1_filter_gain(0.8, snap.gps_data_interval_s);

        snap.velocity_to_home_cm_s =
            (self.prev_distance_to_home_cm - inputs.gps.distance_to_home_cm) / snap.gps_data_interval_s;
        self.prev_distance_to_home_cm = inputs.gps.distance_to_home_cm;

        snap.ascend_step_cm = snap.gps_data_interval_s * ascend_rate_cm_s;
        snap.descend_step_cm = snap.gps_data_interval_s * descend_rate_cm_s;
        snap.max_pitch_step = snap.gps_data_interval_s * 3000.;

        self.last_gps_fields = GpsDerivedFields {
            distance_to_home_m: snap.distance_to_home_m,
            ground_speed_cm_s: snap.ground_speed_cm_s,
            direction_to_home_deg: snap.direction_to_home_deg,
            error_angle_deg: snap.error_angle_deg,
            abs_error_angle_deg: snap.abs_error_angle_deg,
            velocity_to_home_cm_s: snap.velocity_to_home_cm_s,
            gps_data_interval_s: snap.gps_data_interval_s,
            filter_k: snap.filter_k,
            ascend_step_cm: snap.ascend_step_cm,
            descend_step_cm: snap.descend_step_cm,
            max_pitch_step: snap.max_pitch_step,
        };

        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize180_folds_once() {
        assert_eq!(normalize180(200.), -160.);
        assert_eq!(normalize180(-200.), 160.);
        assert_eq!(normalize180(180.), 180.);
        assert_eq!(normalize180(-180.), 180.);
        assert_eq!(normalize180(0.), 0.);
    }

    #[test]
    fn pt1_gain_matches_known_points() {
        // From the reference firmware's own comment: 0.8341 @ 1Hz, 0.3345 @ 10Hz.
        assert!((pt1_filter_gain(0.8, 1.0) - 0.8341).abs() < 0.001);
        assert!((pt1_filter_gain(0.8, 0.1) - 0.3345).abs() < 0.001);
    }

    #[test]
    fn acc_magnitude_uses_float_sqrt_while_landing() {
        let mut agg = SensorAggregator::default();
        let inputs = TickInputs {
            accel: AccelInputs { x_g: 0., y_g: 0., z_g: 2. },
            ..Default::default()
        };
        let snap = agg.update(&inputs, true, 500., 125.);
        assert!((snap.acc_magnitude_g - 2.0).abs() < 1e-5);

        let snap_not_landing = agg.update(&inputs, false, 500., 125.);
        assert_eq!(snap_not_landing.acc_magnitude_g, 0.0);
    }

    #[test]
    fn gps_rate_fields_carry_forward_between_samples() {
        let mut agg = SensorAggregator::default();
        let mut inputs = TickInputs {
            new_gps_data: true,
            now_micros: 0,
            gps: GpsInputs {
                distance_to_home_cm: 20_000.,
                direction_to_home_deg10: 0.,
                ..Default::default()
            },
            ..Default::default()
        };
        let with_sample = agg.update(&inputs, false, 500., 125.);
        assert_eq!(with_sample.distance_to_home_m, 200.);
        assert!(with_sample.filter_k > 0.0);

        // No new sample this tick: GPS-rate fields must hold their last value, not reset to 0.
        inputs.new_gps_data = false;
        inputs.now_micros = 10_000;
        let without_sample = agg.update(&inputs, false, 500., 125.);
        assert_eq!(without_sample.distance_to_home_m, with_sample.distance_to_home_m);
        assert_eq!(without_sample.gps_data_interval_s, with_sample.gps_data_interval_s);
        assert_eq!(without_sample.filter_k, with_sample.filter_k);
        assert_eq!(without_sample.ascend_step_cm, with_sample.ascend_step_cm);
    }

    proptest::proptest! {
        /// Property 7: `errorAngle` after normalization always lies in (-180, 180]. The
        /// single-fold implementation only needs to cover the realistic input domain: the
        /// difference of two `deg*10` headings scaled by 0.1 is always within (-360, 360).
        #[test]
        fn normalize180_always_in_range(deg in -360.0f32..360.0f32) {
            let out = normalize180(deg);
            proptest::prop_assert!(out > -180.0 && out <= 180.0);
        }

        /// `gpsDataIntervalSeconds` is always clamped to [0.01, 1.0] regardless of the raw
        /// interval, however short or long.
        #[test]
        fn update_clamps_gps_interval(interval_us in 0u32..5_000_000u32) {
            let mut agg = SensorAggregator::default();
            let mut inputs = TickInputs {
                new_gps_data: true,
                now_micros: interval_us,
                ..Default::default()
            };
            let _ = agg.update(&inputs, false, 500., 125.);
            inputs.now_micros = interval_us.saturating_add(interval_us);
            let snap = agg.update(&inputs, false, 500., 125.);
            proptest::prop_assert!(snap.gps_data_interval_s >= 0.01 && snap.gps_data_interval_s <= 1.0);
        }
    }
}
