//! Local metric scaling and beam angle frame conversions.
//!
//! Take-off angles are measured from vertical; the azimuth is 0 toward
//! starboard and 90 forward. The roll-pitch frame uses a pitch angle
//! `alpha` out of the across-track plane and a roll angle `beta` measured
//! from the starboard horizontal.

const C1: f64 = 111_412.84;
const C2: f64 = -93.5;
const C3: f64 = 0.118;
const C4: f64 = 111_132.92;
const C5: f64 = -559.82;
const C6: f64 = 1.175;
const C7: f64 = -0.0023;

/// Degrees of longitude and latitude per metre at `latitude`.
pub fn coor_scale(latitude: f64) -> (f64, f64) {
    let rlat = latitude.to_radians();
    let mtodeglon =
        1.0 / (C1 * rlat.cos() + C2 * (3.0 * rlat).cos() + C3 * (5.0 * rlat).cos()).abs();
    let mtodeglat = 1.0
        / (C4 + C5 * (2.0 * rlat).cos() + C6 * (4.0 * rlat).cos() + C7 * (6.0 * rlat).cos())
            .abs();
    (mtodeglon, mtodeglat)
}

/// (theta, phi) in degrees to (alpha, beta) in degrees.
pub fn takeoff_to_rollpitch(theta: f64, phi: f64) -> (f64, f64) {
    let (st, ct) = theta.to_radians().sin_cos();
    let (sp, cp) = phi.to_radians().sin_cos();
    let x = st * cp;
    let y = st * sp;
    let z = ct;
    let alpha = y.clamp(-1.0, 1.0).asin();
    let beta = z.atan2(x);
    (alpha.to_degrees(), beta.to_degrees())
}

/// (alpha, beta) in degrees back to (theta, phi) in degrees.
pub fn rollpitch_to_takeoff(alpha: f64, beta: f64) -> (f64, f64) {
    let (sa, ca) = alpha.to_radians().sin_cos();
    let (sb, cb) = beta.to_radians().sin_cos();
    let x = ca * cb;
    let y = sa;
    let z = ca * sb;
    let theta = z.clamp(-1.0, 1.0).acos();
    let phi = if x == 0.0 && y == 0.0 { 0.0 } else { y.atan2(x) };
    (theta.to_degrees(), phi.to_degrees())
}

/// Take-off angle and azimuth of a sounding vector relative to the sonar.
pub fn xyz_to_takeoff(acrosstrack: f64, alongtrack: f64, down: f64) -> (f64, f64) {
    let r = (acrosstrack * acrosstrack + alongtrack * alongtrack + down * down).sqrt();
    if r <= 0.0 {
        return (0.0, 0.0);
    }
    let theta = (down / r).clamp(-1.0, 1.0).acos().to_degrees();
    let phi = if acrosstrack == 0.0 && alongtrack == 0.0 {
        0.0
    } else {
        alongtrack.atan2(acrosstrack).to_degrees()
    };
    (theta, phi)
}
