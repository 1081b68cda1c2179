//! Persisted configuration for the GPS rescue module. Read-only once a rescue is underway;
//! owned and loaded by the host's parameter-storage subsystem.

/// Version tag for the persisted parameter group this struct's shape corresponds to.
/// Bump this whenever a field is added, removed, or reinterpreted.
pub const CONFIG_VERSION: u8 = 2;

/// Which altitude the craft climbs to before flying home.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum AltitudeMode {
    /// Climb to the highest altitude seen since arming, plus a buffer.
    MaxAlt,
    /// Climb to a fixed configured altitude.
    FixedAlt,
    /// Climb to the altitude at rescue start, plus a buffer.
    CurrentAlt,
}

impl Default for AltitudeMode {
    fn default() -> Self {
        Self::MaxAlt
    }
}

/// Policy for how the sanity watchdog reacts to a non-healthy failure state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum SanityMode {
    /// Never abort on a sanity failure; hold position (`DO_NOTHING`) instead.
    Off,
    /// Always abort (disarm) on a sanity failure.
    On,
    /// Abort only if the radio link is also down (failsafe-triggered rescue).
    FsOnly,
}

impl Default for SanityMode {
    fn default() -> Self {
        Self::FsOnly
    }
}

/// Error returned by [`Config::validate`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum ConfigError {
    /// `throttle_min`, `throttle_hover`, `throttle_max` are not in ascending order.
    ThrottleRangeInverted,
    /// `min_rescue_dth_m` must be positive.
    NonPositiveMinDth,
    /// `descent_distance_m` must be at least the 10 m floor the phase machine clamps to.
    DescentDistanceTooSmall,
}

/// Tunable parameters for a rescue. Defaults match the reference firmware's reset template.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Max bank/pitch angle used while flying home, in degrees.
    pub angle_deg: u8,
    /// Altitude to climb to in `FixedAlt` mode, in meters.
    pub initial_altitude_m: f32,
    /// Radius around home at which cruise transitions to descent, in meters.
    pub descent_distance_m: f32,
    /// Cruise groundspeed during fly-home, in cm/s.
    pub rescue_groundspeed_cm_s: f32,

    pub throttle_p: f32,
    pub throttle_i: f32,
    pub throttle_d: f32,

    pub vel_p: f32,
    pub vel_i: f32,
    pub vel_d: f32,

    pub yaw_p: f32,

    /// PWM microseconds.
    pub throttle_min: f32,
    pub throttle_max: f32,
    pub throttle_hover: f32,

    pub sanity_checks: SanityMode,
    /// Below this distance from home, a rescue switches straight to landing. Meters.
    pub min_rescue_dth_m: f32,
    /// Permit arming without a GPS fix (rescue will simply be `isDisabled()` until one arrives).
    pub allow_arming_without_fix: bool,
    /// Whether to fuse the magnetometer during a rescue, if one is fitted.
    pub use_mag: bool,
    pub target_landing_altitude_m: f32,
    pub altitude_mode: AltitudeMode,
    /// cm/s, used to compute the per-GPS-sample altitude step on the way up.
    pub ascend_rate_cm_s: f32,
    /// cm/s, used to compute the per-GPS-sample altitude step descending and landing.
    pub descend_rate_cm_s: f32,
    pub rescue_altitude_buffer_m: f32,
    /// 0-100: how much of the corrective yaw rate is mixed into roll.
    pub roll_mix: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            angle_deg: 32,
            initial_altitude_m: 30.,
            descent_distance_m: 20.,
            rescue_groundspeed_cm_s: 500.,
            throttle_p: 20.,
            throttle_i: 20.,
            throttle_d: 10.,
            vel_p: 6.,
            vel_i: 20.,
            vel_d: 70.,
            yaw_p: 25.,
            throttle_min: 1100.,
            throttle_max: 1600.,
            throttle_hover: 1275.,
            sanity_checks: SanityMode::FsOnly,
            min_rescue_dth_m: 30.,
            allow_arming_without_fix: false,
            use_mag: true,
            target_landing_altitude_m: 5.,
            altitude_mode: AltitudeMode::MaxAlt,
            ascend_rate_cm_s: 500.,
            descend_rate_cm_s: 125.,
            rescue_altitude_buffer_m: 10.,
            roll_mix: 100.,
        }
    }
}

impl Config {
    /// Sanity-check a loaded parameter block before it's trusted for a rescue. The host should
    /// call this once after loading from the parameter-storage subsystem, not on every tick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.throttle_min < self.throttle_hover && self.throttle_hover < self.throttle_max) {
            return Err(ConfigError::ThrottleRangeInverted);
        }
        if self.min_rescue_dth_m <= 0. {
            return Err(ConfigError::NonPositiveMinDth);
        }
        if self.descent_distance_m < 10. {
            return Err(ConfigError::DescentDistanceTooSmall);
        }
        Ok(())
    }
}
