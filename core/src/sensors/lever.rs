/// Vertical displacement of the sonar caused by roll and pitch about the
/// motion sensor, positive down.
///
/// Offsets are (x starboard, y forward, z down) in metres; angles in degrees,
/// roll positive starboard down and pitch positive bow up.
pub fn lever_heave(sonar: [f64; 3], vru: [f64; 3], roll: f64, pitch: f64) -> f64 {
    let x = sonar[0] - vru[0];
    let y = sonar[1] - vru[1];
    let z = sonar[2] - vru[2];
    let (sr, cr) = roll.to_radians().sin_cos();
    let (sp, cp) = pitch.to_radians().sin_cos();
    let z_rolled = z * cr + x * sr;
    let z_pitched = z_rolled * cp - y * sp;
    z_pitched - z
}
