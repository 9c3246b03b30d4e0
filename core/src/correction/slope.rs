use crate::interp::linear_lookup;
use crate::math::StatsHelper;
use crate::ping::Ping;

/// Boxcar width used when smoothing the swath profile.
pub const SMOOTH_WIDTH: usize = 5;
/// Flat-bottom altitude assumed when a ping carries no usable bathymetry.
pub const DEFAULT_ALTITUDE: f64 = 1000.0;

/// Smoothed across-track depth profile of one ping and its slopes.
#[derive(Debug, Clone, Default)]
pub struct SwathProfile {
    across: Vec<f64>,
    depth: Vec<f64>,
    slope_across: Vec<f64>,
    slope: Vec<f64>,
    sensor_depth: f64,
    fallback_altitude: f64,
}

impl SwathProfile {
    pub fn from_ping(ping: &Ping, smooth: usize) -> Self {
        let mut soundings: Vec<(f64, f64)> = ping
            .good_beams()
            .map(|(_, beam)| (beam.acrosstrack, beam.depth))
            .collect();
        soundings.sort_by(|a, b| a.0.total_cmp(&b.0));
        soundings.dedup_by(|a, b| a.0 == b.0);

        let across: Vec<f64> = soundings.iter().map(|s| s.0).collect();
        let raw: Vec<f64> = soundings.iter().map(|s| s.1).collect();
        let mut depth = vec![0.0; raw.len()];
        StatsHelper::boxcar(&raw, smooth.max(1), &mut depth);

        let slope_across = across.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        let slope = across
            .windows(2)
            .zip(depth.windows(2))
            .map(|(x, z)| (z[1] - z[0]) / (x[1] - x[0]))
            .collect();

        let sensor_depth = ping.platform.sensor_depth();
        let fallback_altitude = if ping.altitude > 0.0 {
            ping.altitude
        } else {
            DEFAULT_ALTITUDE
        };
        Self {
            across,
            depth,
            slope_across,
            slope,
            sensor_depth,
            fallback_altitude,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.across.is_empty()
    }

    /// Altitude below the sonar and seafloor slope (dz/dx) at `across`.
    /// Without bathymetry the bottom is flat at the fallback altitude.
    pub fn altitude_and_slope(&self, across: f64) -> (f64, f64) {
        let Some(depth) = linear_lookup(&self.across, &self.depth, across) else {
            return (self.fallback_altitude, 0.0);
        };
        let altitude = depth - self.sensor_depth;
        let altitude = if altitude > 0.0 {
            altitude
        } else {
            self.fallback_altitude
        };
        let inside = !self.slope.is_empty()
            && across >= self.slope_across[0]
            && across <= self.slope_across[self.slope_across.len() - 1];
        let slope = if inside {
            linear_lookup(&self.slope_across, &self.slope, across).unwrap_or(0.0)
        } else {
            0.0
        };
        (altitude, slope)
    }

    /// Signed incidence angle in degrees at `across`, optionally tilted by slope.
    pub fn incidence_angle(&self, across: f64, use_slope: bool) -> f64 {
        let (altitude, slope) = self.altitude_and_slope(across);
        let slope = if use_slope { slope } else { 0.0 };
        grazing_angle(across, altitude, slope)
    }
}

/// Angle between the ray and the seafloor normal, degrees, negative to port.
pub fn grazing_angle(across: f64, altitude: f64, slope: f64) -> f64 {
    (across / altitude).atan().to_degrees() + slope.atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::{Beam, BeamFlag, Platform};

    fn ping(soundings: &[(f64, f64)]) -> Ping {
        Ping {
            platform: Platform {
                draft: 5.0,
                ..Default::default()
            },
            beams: soundings
                .iter()
                .map(|&(across, depth)| Beam::sounding(depth, across, 0.0))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn flat_seafloor_has_zero_slope() {
        let profile = SwathProfile::from_ping(&ping(&[(-100.0, 105.0), (0.0, 105.0), (100.0, 105.0)]), SMOOTH_WIDTH);
        let (altitude, slope) = profile.altitude_and_slope(50.0);
        assert_eq!(altitude, 100.0);
        assert_eq!(slope, 0.0);
        assert!((profile.incidence_angle(100.0, true) - 45.0).abs() < 1e-9);
        assert!((profile.incidence_angle(-100.0, true) + 45.0).abs() < 1e-9);
    }

    #[test]
    fn tilted_seafloor_adds_slope_angle() {
        let soundings: Vec<(f64, f64)> = (-5..=5).map(|i| (i as f64 * 20.0, 105.0 + i as f64 * 2.0)).collect();
        let profile = SwathProfile::from_ping(&ping(&soundings), 1);
        let (altitude, slope) = profile.altitude_and_slope(0.0);
        assert!((altitude - 100.0).abs() < 1e-9);
        assert!((slope - 0.1).abs() < 1e-9);
        let tilted = profile.incidence_angle(0.0, true);
        assert!((tilted - 0.1f64.atan().to_degrees()).abs() < 1e-9);
        assert_eq!(profile.incidence_angle(0.0, false), 0.0);
    }

    #[test]
    fn no_bathymetry_falls_back_to_flat_bottom() {
        let mut p = ping(&[(10.0, 50.0)]);
        p.beams[0].flag = BeamFlag::Null;
        let profile = SwathProfile::from_ping(&p, SMOOTH_WIDTH);
        assert!(profile.is_empty());
        assert_eq!(profile.altitude_and_slope(10.0), (DEFAULT_ALTITUDE, 0.0));
        p.altitude = 80.0;
        assert_eq!(SwathProfile::from_ping(&p, SMOOTH_WIDTH).altitude_and_slope(0.0), (80.0, 0.0));
    }
}
