use crate::prelude::{StageError, StageResult};
use log::warn;
use std::fs;
use std::path::Path;

/// Profiles are extended with constant velocity to this depth.
pub const MAX_PROFILE_DEPTH: f64 = 12_000.0;
/// Nominal sound speed used for uncorrected depths.
pub const REFERENCE_VELOCITY: f64 = 1500.0;

/// Depth-increasing (depth, velocity) nodes starting at the surface.
#[derive(Debug, Clone)]
pub struct SoundSpeedProfile {
    depth: Vec<f64>,
    velocity: Vec<f64>,
    /// `velocity_sum[i]` integrates velocity over depth from 0 to `depth[i + 1]`.
    velocity_sum: Vec<f64>,
}

impl SoundSpeedProfile {
    pub fn load<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            StageError::Configuration(format!(
                "unable to read velocity profile {}: {}",
                path.display(),
                err
            ))
        })?;
        let mut pairs = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace().map(str::parse::<f64>);
            if let (Some(Ok(depth)), Some(Ok(velocity))) = (fields.next(), fields.next()) {
                pairs.push((depth, velocity));
            }
        }
        Self::from_pairs(&pairs).map_err(|err| match err {
            StageError::Configuration(msg) => {
                StageError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_pairs(pairs: &[(f64, f64)]) -> StageResult<Self> {
        let mut depth: Vec<f64> = Vec::with_capacity(pairs.len() + 2);
        let mut velocity: Vec<f64> = Vec::with_capacity(pairs.len() + 2);
        for &(z, v) in pairs {
            if depth.is_empty() {
                if z > 0.0 {
                    warn!("profile starts at {:.2} m, adding a surface node", z);
                    depth.push(0.0);
                    velocity.push(v);
                    depth.push(z);
                } else {
                    if z < 0.0 {
                        warn!("profile starts above the surface at {:.2} m, reset to 0", z);
                    }
                    depth.push(0.0);
                }
                velocity.push(v);
            } else if z > depth[depth.len() - 1] {
                depth.push(z);
                velocity.push(v);
            } else {
                warn!("profile node at {:.2} m ignored: depth not increasing", z);
            }
        }
        if depth.is_empty() {
            return Err(StageError::Configuration(
                "no depth/velocity pairs in profile".into(),
            ));
        }
        if depth[depth.len() - 1] < MAX_PROFILE_DEPTH {
            let last = velocity[velocity.len() - 1];
            depth.push(MAX_PROFILE_DEPTH);
            velocity.push(last);
        }

        let mut velocity_sum = Vec::with_capacity(depth.len() - 1);
        let mut running = 0.0;
        for i in 0..depth.len() - 1 {
            running += 0.5 * (velocity[i + 1] + velocity[i]) * (depth[i + 1] - depth[i]);
            velocity_sum.push(running);
        }

        Ok(Self {
            depth,
            velocity,
            velocity_sum,
        })
    }

    pub fn depths(&self) -> &[f64] {
        &self.depth
    }

    pub fn velocities(&self) -> &[f64] {
        &self.velocity
    }

    pub fn surface_velocity(&self) -> f64 {
        self.velocity[0]
    }

    pub fn top(&self) -> f64 {
        self.depth[0]
    }

    pub fn bottom(&self) -> f64 {
        self.depth[self.depth.len() - 1]
    }

    /// Index of the layer holding `z`; the last layer includes its bottom.
    pub fn layer_index(&self, z: f64) -> Option<usize> {
        if z < self.top() || z > self.bottom() {
            return None;
        }
        let k = self.depth.partition_point(|&d| d <= z).saturating_sub(1);
        Some(k.min(self.depth.len() - 2))
    }

    pub fn velocity_at(&self, z: f64) -> Option<f64> {
        let k = self.layer_index(z)?;
        let gradient = (self.velocity[k + 1] - self.velocity[k]) / (self.depth[k + 1] - self.depth[k]);
        Some(self.velocity[k] + gradient * (z - self.depth[k]))
    }

    /// Integral of velocity over depth from the surface to `z`.
    fn integral_to(&self, z: f64) -> f64 {
        let z = z.clamp(self.top(), self.bottom());
        let Some(k) = self.layer_index(z) else {
            return 0.0;
        };
        let below = if k > 0 { self.velocity_sum[k - 1] } else { 0.0 };
        let dz = z - self.depth[k];
        let slope = (self.velocity[k + 1] - self.velocity[k]) / (self.depth[k + 1] - self.depth[k]);
        below + 0.5 * (2.0 * self.velocity[k] + dz * slope) * dz
    }

    /// Mean velocity over the water column between two depths.
    pub fn column_average(&self, from: f64, to: f64) -> f64 {
        let span = to - from;
        if span <= 0.0 {
            return REFERENCE_VELOCITY;
        }
        let average = (self.integral_to(to) - self.integral_to(from)) / span;
        if average > 0.0 {
            average
        } else {
            REFERENCE_VELOCITY
        }
    }

    /// Switches a depth between nominal-1500 and sound-speed-corrected conventions.
    ///
    /// `offset` is the transducer depth; only the water column below it is rescaled.
    pub fn convert_reference(&self, depth: f64, offset: f64, to_corrected: bool) -> f64 {
        let column = depth - offset;
        let average = self.column_average(offset.max(self.top()), depth);
        if to_corrected {
            column * average / REFERENCE_VELOCITY + offset
        } else {
            column * REFERENCE_VELOCITY / average + offset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn profile_gets_surface_node_and_extension() {
        let profile = SoundSpeedProfile::from_pairs(&[(5.0, 1490.0), (100.0, 1500.0)]).unwrap();
        assert_eq!(profile.depths(), &[0.0, 5.0, 100.0, MAX_PROFILE_DEPTH]);
        assert_eq!(profile.velocities()[0], 1490.0);
        assert_eq!(profile.velocities()[3], 1500.0);
    }

    #[test]
    fn non_increasing_nodes_are_dropped() {
        let profile =
            SoundSpeedProfile::from_pairs(&[(0.0, 1500.0), (50.0, 1490.0), (50.0, 1480.0), (20.0, 1470.0)])
                .unwrap();
        assert_eq!(profile.depths().len(), 3);
        assert!((profile.velocity_at(25.0).unwrap() - 1495.0).abs() < 1e-9);
        assert_eq!(profile.velocity_at(-1.0), None);
    }

    #[test]
    fn column_average_of_linear_profile() {
        let profile =
            SoundSpeedProfile::from_pairs(&[(0.0, 1500.0), (100.0, 1520.0), (12_000.0, 1520.0)]).unwrap();
        assert!((profile.column_average(0.0, 100.0) - 1510.0).abs() < 1e-9);
        assert!((profile.column_average(50.0, 100.0) - 1515.0).abs() < 1e-9);
    }

    #[test]
    fn reference_conversion_round_trips() {
        let profile = SoundSpeedProfile::from_pairs(&[(0.0, 1480.0), (200.0, 1520.0)]).unwrap();
        let corrected = profile.convert_reference(150.0, 5.0, true);
        let back = profile.convert_reference(corrected, 5.0, false);
        assert!(corrected != 150.0);
        assert!((back - 150.0).abs() < 0.05);
    }

    #[test]
    fn load_skips_comments() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"# cast 1\n0 1500\n100 1510\n").unwrap();
        let profile = SoundSpeedProfile::load(temp.path()).unwrap();
        assert_eq!(profile.surface_velocity(), 1500.0);
        assert_eq!(profile.bottom(), MAX_PROFILE_DEPTH);
    }

    #[test]
    fn empty_profile_is_configuration_error() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"# nothing here\n").unwrap();
        assert!(matches!(
            SoundSpeedProfile::load(temp.path()),
            Err(StageError::Configuration(_))
        ));
    }
}
