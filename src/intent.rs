//! Mutable targets the controllers chase. Initialized in `Idle`, mutated on phase entry and on
//! some in-phase events; persists across ticks otherwise.

#[derive(Clone, Copy, Debug, Default)]
pub struct Intent {
    pub return_altitude_cm: f32,
    pub target_altitude_cm: f32,
    pub target_velocity_cm_s: f32,
    pub pitch_angle_limit_deg: f32,
    /// Signed: negative and positive roll are both reachable.
    pub roll_angle_limit_deg: f32,
    pub update_yaw: bool,
    pub descent_distance_m: f32,
    /// Reused across FLY_HOME/ATTAIN_ALT/DESCENT/LANDING as a single saturating counter, reset
    /// on entry to whichever of those phases is current. Range [0, 20]; the watchdog clamps it
    /// to a tighter [0, 10] range outside FLY_HOME.
    pub seconds_failing: i8,
    /// Set on entry to `AttainAlt`: whether the craft started below `return_altitude_cm`
    /// (climbing) or above it (descending to the return altitude). Unlike the reference
    /// firmware, this is stored for the duration of the phase rather than recomputed from a
    /// stale default every tick.
    pub started_low: bool,
}
