use crate::config::AngleMode;
use crate::prelude::{StageError, StageResult};
use crate::raytrace::svp::SoundSpeedProfile;

/// Gradients below this magnitude are treated as constant-velocity layers.
const HOMOGENEOUS_GRADIENT: f64 = 1.0e-5;
const MAX_STEPS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayStatus {
    Down,
    /// The ray turned and was travelling upward when time ran out.
    Up,
    OutTop,
    OutBottom,
    Stalled,
}

impl RayStatus {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RayStatus::OutTop | RayStatus::OutBottom | RayStatus::Stalled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayResult {
    /// Horizontal distance from the source, signed by the take-off side.
    pub range: f64,
    pub depth: f64,
    /// One-way time actually traced.
    pub time: f64,
    pub status: RayStatus,
}

struct Layer {
    top: f64,
    bottom: f64,
    v_top: f64,
    gradient: f64,
}

impl Layer {
    fn of(profile: &SoundSpeedProfile, k: usize) -> Self {
        let depth = profile.depths();
        let velocity = profile.velocities();
        Self {
            top: depth[k],
            bottom: depth[k + 1],
            v_top: velocity[k],
            gradient: (velocity[k + 1] - velocity[k]) / (depth[k + 1] - depth[k]),
        }
    }

    fn velocity(&self, z: f64) -> f64 {
        self.v_top + self.gradient * (z - self.top)
    }

    fn homogeneous(&self) -> bool {
        self.gradient.abs() <= HOMOGENEOUS_GRADIENT
    }
}

fn cosine(p: f64, v: f64) -> f64 {
    (1.0 - (p * v).powi(2)).max(0.0).sqrt()
}

/// Traces a ray for `half_time` seconds from `launch_depth`.
///
/// A launch above the profile top is traced from the top and the shortfall
/// is added back as a static shift. Angles are degrees from vertical, positive
/// to starboard.
pub fn compute_depth(
    profile: &SoundSpeedProfile,
    launch_depth: f64,
    takeoff_angle: f64,
    half_time: f64,
    angle_mode: AngleMode,
    surface_velocity: f64,
    null_angle: f64,
) -> StageResult<RayResult> {
    if half_time <= 0.0 {
        return Err(StageError::InvalidInput(format!(
            "non-positive travel time {}",
            half_time
        )));
    }
    let static_shift = (launch_depth - profile.top()).min(0.0);
    let source_depth = launch_depth - static_shift;
    let mut layer = profile.layer_index(source_depth).ok_or_else(|| {
        StageError::InvalidInput(format!(
            "source depth {:.2} below profile bottom {:.2}",
            source_depth,
            profile.bottom()
        ))
    })?;
    let source_velocity = Layer::of(profile, layer).velocity(source_depth);

    let mut angle = takeoff_angle;
    if surface_velocity > 0.0 {
        match angle_mode {
            AngleMode::Correct => {
                let p = angle.to_radians().sin() / surface_velocity;
                angle = (p * source_velocity).min(1.0).asin().to_degrees();
            }
            AngleMode::Incorrect => {
                let diff = (angle - null_angle).to_radians();
                let p = diff.sin() / surface_velocity;
                angle = null_angle + (p * source_velocity).min(1.0).asin().to_degrees();
            }
            AngleMode::NoCorrection => {}
        }
    }

    let sign = if angle > 0.0 { 1.0 } else { -1.0 };
    let angle = angle.abs();
    let p = angle.to_radians().sin() / source_velocity;
    let mut down = angle < 90.0;

    let mut x = 0.0;
    let mut z = source_depth;
    let mut time_left = half_time;
    let last_layer = profile.depths().len() - 2;
    let mut status = None;

    for _ in 0..MAX_STEPS {
        let current = Layer::of(profile, layer);
        let v_here = current.velocity(z);

        if current.homogeneous() {
            let c = cosine(p, v_here);
            if c <= 0.0 {
                x += v_here * time_left;
                time_left = 0.0;
                break;
            }
            let s = p * v_here;
            let boundary = if down { current.bottom } else { current.top };
            let dz = (boundary - z).abs();
            let dt = dz / c / v_here;
            if dt >= time_left {
                let path = v_here * time_left;
                z += if down { path * c } else { -path * c };
                x += path * s;
                time_left = 0.0;
                break;
            }
            x += dz * s / c;
            z = boundary;
            time_left -= dt;
        } else {
            let g = current.gradient;
            let boundary = if down { current.bottom } else { current.top };
            let v_boundary = current.velocity(boundary);
            let turns = p > 0.0 && p * v_boundary >= 1.0;
            let (z_end, v_end) = if turns {
                let v_turn = 1.0 / p;
                (current.top + (v_turn - current.v_top) / g, v_turn)
            } else {
                (boundary, v_boundary)
            };
            let c_here = cosine(p, v_here);
            let c_end = cosine(p, v_end);
            let u_here = v_here / (1.0 + c_here);
            let u_end = v_end / (1.0 + c_end);
            let dt = ((u_end / u_here).ln() / g).abs();
            let dx = if p > 0.0 {
                (c_here - c_end).abs() / (p * g.abs())
            } else {
                0.0
            };
            if dt >= time_left {
                let direction = if u_end >= u_here { 1.0 } else { -1.0 };
                let u_f = u_here * (direction * g.abs() * time_left).exp();
                let v_f = 2.0 * u_f / (1.0 + (p * u_f).powi(2));
                let c_f = cosine(p, v_f);
                z = current.top + (v_f - current.v_top) / g;
                if p > 0.0 {
                    x += (c_here - c_f).abs() / (p * g.abs());
                }
                time_left = 0.0;
                break;
            }
            x += dx;
            z = z_end;
            time_left -= dt;
            if turns {
                down = !down;
                continue;
            }
        }

        if down {
            if layer == last_layer {
                status = Some(RayStatus::OutBottom);
                break;
            }
            layer += 1;
        } else {
            if layer == 0 {
                status = Some(RayStatus::OutTop);
                break;
            }
            layer -= 1;
        }
    }

    let status = match status {
        Some(status) => status,
        None if time_left > 0.0 => RayStatus::Stalled,
        None if down => RayStatus::Down,
        None => RayStatus::Up,
    };

    Ok(RayResult {
        range: sign * x,
        depth: z + static_shift,
        time: half_time - time_left,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: f64) -> SoundSpeedProfile {
        SoundSpeedProfile::from_pairs(&[(0.0, v), (12_000.0, v)]).unwrap()
    }

    #[test]
    fn homogeneous_vertical_ray() {
        let profile = constant(1500.0);
        for half_time in [0.01, 0.1, 0.5, 2.0] {
            let ray =
                compute_depth(&profile, 0.0, 0.0, half_time, AngleMode::Correct, 1500.0, 0.0).unwrap();
            assert!((ray.depth - 1500.0 * half_time).abs() < 1e-6);
            assert!(ray.range.abs() < 1e-6);
            assert_eq!(ray.status, RayStatus::Down);
        }
    }

    #[test]
    fn homogeneous_oblique_ray_is_straight() {
        let profile = constant(1500.0);
        let ray = compute_depth(&profile, 5.0, -30.0, 0.2, AngleMode::Correct, 1500.0, 0.0).unwrap();
        let path = 1500.0 * 0.2;
        assert!((ray.depth - (5.0 + path * 30f64.to_radians().cos())).abs() < 1e-6);
        assert!((ray.range + path * 0.5).abs() < 1e-6);
    }

    #[test]
    fn vertical_ray_in_gradient_layer() {
        let g = 0.05;
        let profile = SoundSpeedProfile::from_pairs(&[(0.0, 1480.0), (2000.0, 1480.0 + g * 2000.0)]).unwrap();
        let t = 0.5;
        let ray = compute_depth(&profile, 0.0, 0.0, t, AngleMode::NoCorrection, 0.0, 0.0).unwrap();
        let expected = 1480.0 * ((g * t).exp() - 1.0) / g;
        assert!((ray.depth - expected).abs() < 1e-6);
    }

    #[test]
    fn oblique_gradient_ray_crosses_layers_consistently() {
        let profile = SoundSpeedProfile::from_pairs(&[
            (0.0, 1500.0),
            (100.0, 1490.0),
            (400.0, 1485.0),
            (1000.0, 1495.0),
        ])
        .unwrap();
        let short = compute_depth(&profile, 2.0, 45.0, 0.1, AngleMode::Correct, 1500.0, 0.0).unwrap();
        let long = compute_depth(&profile, 2.0, 45.0, 0.4, AngleMode::Correct, 1500.0, 0.0).unwrap();
        assert!(long.depth > short.depth);
        assert!(long.range > short.range);
        assert!((long.time - 0.4).abs() < 1e-12);
        let slant = (long.depth - 2.0).hypot(long.range);
        assert!(slant < 1500.0 * 0.4 && slant > 1480.0 * 0.4);
    }

    #[test]
    fn launch_above_profile_applies_static_shift() {
        let profile = constant(1500.0);
        let ray = compute_depth(&profile, -1.5, 0.0, 0.1, AngleMode::Correct, 1500.0, 0.0).unwrap();
        assert!((ray.depth - (150.0 - 1.5)).abs() < 1e-6);
    }

    #[test]
    fn ray_leaving_profile_bottom_fails() {
        let profile = constant(1500.0);
        let ray = compute_depth(&profile, 0.0, 0.0, 10.0, AngleMode::Correct, 1500.0, 0.0).unwrap();
        assert_eq!(ray.status, RayStatus::OutBottom);
        assert!(ray.status.is_failure());
    }

    #[test]
    fn non_positive_time_is_rejected() {
        let profile = constant(1500.0);
        assert!(compute_depth(&profile, 0.0, 0.0, 0.0, AngleMode::Correct, 1500.0, 0.0).is_err());
    }

    #[test]
    fn surface_velocity_mismatch_refracts_takeoff() {
        let profile = constant(1500.0);
        let ray = compute_depth(&profile, 0.0, 30.0, 0.1, AngleMode::Correct, 1450.0, 0.0).unwrap();
        let refracted = (30f64.to_radians().sin() * 1500.0 / 1450.0).asin();
        let path = 150.0;
        assert!((ray.range - path * refracted.sin()).abs() < 1e-6);
    }
}
