//! Availability Probe: an independent, 1 Hz-refreshed "would a rescue work right now" signal
//! for OSD/UI warnings. Runs regardless of whether a rescue is active, and is deliberately
//! decoupled from the sanity watchdog's pass/fail policy. Ported from the reference firmware's
//! `checkGPSRescueIsAvailable()`.

/// Cross-tick memory: the 1 Hz-latched sub-results that make up `is_available`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AvailabilityProbe {
    previous_time_micros: u32,
    low_sats: i8,
    no_gps_fix: bool,
    low_sats_latched: bool,
}

pub struct AvailabilityInputs {
    pub now_micros: u32,
    pub gps_healthy: bool,
    pub gps_fix_home: bool,
    pub has_3d_fix: bool,
    pub num_sat: u8,
    pub gps_minimum_sats: u8,
}

impl AvailabilityProbe {
    /// Run one tick. Immediate `false` on unhealthy GPS or no home fix; otherwise the 1 Hz
    /// sub-checks are only refreshed once a second has elapsed, and latched in between.
    pub fn update(&mut self, inputs: &AvailabilityInputs) -> bool {
        if !inputs.gps_healthy || !inputs.gps_fix_home {
            return false;
        }

        let dt_micros = inputs.now_micros.wrapping_sub(self.previous_time_micros);
        if dt_micros < 1_000_000 {
            return !(self.no_gps_fix || self.low_sats_latched);
        }
        self.previous_time_micros = inputs.now_micros;

        let mut result = true;

        if !inputs.has_3d_fix {
            result = false;
            self.no_gps_fix = true;
        } else {
            self.no_gps_fix = false;
        }

        self.low_sats = (self.low_sats + if inputs.num_sat < inputs.gps_minimum_sats { 1 } else { -1 })
            .clamp(0, 2);
        if self.low_sats == 2 {
            self.low_sats_latched = true;
            result = false;
        } else {
            self.low_sats_latched = false;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(now_micros: u32, num_sat: u8) -> AvailabilityInputs {
        AvailabilityInputs {
            now_micros,
            gps_healthy: true,
            gps_fix_home: true,
            has_3d_fix: true,
            num_sat,
            gps_minimum_sats: 5,
        }
    }

    #[test]
    fn unhealthy_gps_or_missing_home_fix_is_immediately_unavailable() {
        let mut probe = AvailabilityProbe::default();
        let mut i = inputs(0, 10);
        i.gps_healthy = false;
        assert!(!probe.update(&i));

        let mut probe2 = AvailabilityProbe::default();
        let mut i2 = inputs(0, 10);
        i2.gps_fix_home = false;
        assert!(!probe2.update(&i2));
    }

    #[test]
    fn latches_low_sats_between_one_hz_evaluations() {
        let mut probe = AvailabilityProbe::default();
        let mut t = 0u32;
        // Two consecutive low-sat seconds saturate the counter to 2 and mark unavailable.
        for _ in 0..2 {
            t += 1_000_000;
            probe.update(&inputs(t, 1));
        }
        assert!(!probe.update(&inputs(t + 10, 1)));
    }

    #[test]
    fn recovers_once_sat_count_is_healthy_again() {
        let mut probe = AvailabilityProbe::default();
        let mut t = 0u32;
        for _ in 0..2 {
            t += 1_000_000;
            probe.update(&inputs(t, 1));
        }
        for _ in 0..2 {
            t += 1_000_000;
            probe.update(&inputs(t, 10));
        }
        assert!(probe.update(&inputs(t + 10, 10)));
    }
}
