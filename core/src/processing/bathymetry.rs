use crate::config::{
    BathRecalcMode, NavAdjustMode, StaticMode, SurfaceVelocityMode, SvpMode, TravelTimeMode,
};
use crate::interp::linear_lookup;
use crate::math::{rollpitch_to_takeoff, takeoff_to_rollpitch, xyz_to_takeoff};
use crate::ping::{BeamFlag, Ping};
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::raytrace::{compute_depth, SoundSpeedProfile, REFERENCE_VELOCITY};
use crate::telemetry::log::LogManager;
use log::debug;
use std::fs;
use std::path::Path;

/// Two-way travel times above this are not physical for any profile we trace.
pub const MAX_TRAVEL_TIME: f64 = 20.0;
/// Half of the nominal sound speed, converting slant range to two-way time.
const ESTIMATE_VELOCITY: f64 = 750.0;

/// Depth statics, either per beam number or per across-track angle.
#[derive(Debug, Clone)]
pub enum StaticTable {
    PerBeam(Vec<f64>),
    PerAngle { angles: Vec<f64>, offsets: Vec<f64> },
}

impl StaticTable {
    /// Two columns per line: `beam offset` or `angle offset`. Beam numbers
    /// must be whole and below `max_beams`.
    pub fn load<P: AsRef<Path>>(path: P, mode: StaticMode, max_beams: usize) -> StageResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            StageError::Configuration(format!(
                "unable to read static corrections {}: {}",
                path.display(),
                err
            ))
        })?;
        let mut pairs: Vec<(f64, f64)> = Vec::new();
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace().map(str::parse::<f64>);
            match (fields.next(), fields.next()) {
                (Some(Ok(key)), Some(Ok(offset))) => pairs.push((key, offset)),
                _ => {
                    return Err(StageError::Configuration(format!(
                        "{}: malformed static line '{}'",
                        path.display(),
                        line
                    )))
                }
            }
        }
        if pairs.is_empty() {
            return Err(StageError::Configuration(format!(
                "{}: no static corrections",
                path.display()
            )));
        }
        match mode {
            StaticMode::PerBeam => {
                let mut offsets = Vec::new();
                for (beam, offset) in pairs {
                    if !(beam.is_finite() && beam.fract() == 0.0 && beam >= 0.0 && beam < max_beams as f64) {
                        return Err(StageError::Configuration(format!(
                            "{}: static beam number {} outside 0..{}",
                            path.display(),
                            beam,
                            max_beams
                        )));
                    }
                    let beam = beam as usize;
                    if beam >= offsets.len() {
                        offsets.resize(beam + 1, 0.0);
                    }
                    offsets[beam] = offset;
                }
                Ok(StaticTable::PerBeam(offsets))
            }
            _ => {
                pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
                Ok(StaticTable::PerAngle {
                    angles: pairs.iter().map(|p| p.0).collect(),
                    offsets: pairs.iter().map(|p| p.1).collect(),
                })
            }
        }
    }

    pub fn offset(&self, beam: usize, angle: f64) -> f64 {
        match self {
            StaticTable::PerBeam(offsets) => offsets.get(beam).copied().unwrap_or(0.0),
            StaticTable::PerAngle { angles, offsets } => {
                linear_lookup(angles, offsets, angle).unwrap_or(0.0)
            }
        }
    }
}

/// Recalculation mode after implicit promotions: vertical-only corrections
/// with no recalculation requested still need the depth offset applied.
pub fn effective_recalc(config: &ProcessConfig) -> BathRecalcMode {
    match config.bathymetry.recalc {
        BathRecalcMode::Off
            if config.tide.enabled
                || config.lever.enabled
                || config.nav_adjust.mode == NavAdjustMode::LonLatDepth =>
        {
            BathRecalcMode::Offset
        }
        mode => mode,
    }
}

/// Angle deltas applied to each beam before it is re-traced or rotated.
#[derive(Debug, Clone, Copy)]
struct AttitudeChange {
    roll: f64,
    pitch: f64,
}

impl AttitudeChange {
    fn of(ping: &Ping, config: &ProcessConfig) -> Self {
        Self {
            roll: ping.platform.roll - ping.reported.roll,
            pitch: ping.platform.pitch - ping.reported.pitch + config.pitch_bias.bias(),
        }
    }

    /// Rotates a take-off angle pair through the roll-pitch frame.
    fn apply(&self, theta: f64, phi: f64, config: &ProcessConfig) -> (f64, f64) {
        let (alpha, beta) = takeoff_to_rollpitch(theta, phi);
        let starboard = beta <= 90.0;
        let roll = self.roll + config.roll_bias.bias(starboard);
        if roll == 0.0 && self.pitch == 0.0 {
            return (theta, phi);
        }
        rollpitch_to_takeoff(alpha + self.pitch, beta + roll)
    }
}

/// Recomputes bathymetry from travel times, attitude and vertical offsets.
pub struct BathymetryStage {
    config: Option<ProcessConfig>,
    mode: BathRecalcMode,
    profile: Option<SoundSpeedProfile>,
    statics: Option<StaticTable>,
    last_surface_velocity: Option<f64>,
    logger: LogManager,
}

impl BathymetryStage {
    pub fn new() -> Self {
        Self {
            config: None,
            mode: BathRecalcMode::Off,
            profile: None,
            statics: None,
            last_surface_velocity: None,
            logger: LogManager::new("bathymetry"),
        }
    }

    /// Derives travel times and take-off angles from the reported soundings.
    fn estimate_travel_times(ping: &mut Ping) {
        let draft = ping.reported.draft;
        for beam in ping.beams.iter_mut().filter(|b| !b.flag.is_null()) {
            let down = beam.depth - draft - beam.heave;
            let along = beam.alongtrack - beam.alongtrack_offset;
            let (theta, phi) = xyz_to_takeoff(beam.acrosstrack, along, down);
            let range = (beam.acrosstrack.powi(2) + along.powi(2) + down.powi(2)).sqrt();
            beam.travel_time = range / ESTIMATE_VELOCITY;
            beam.angle = theta;
            beam.angle_forward = phi;
        }
        ping.surface_velocity = REFERENCE_VELOCITY;
        ping.has_travel_times = true;
    }

    fn raytrace(
        ping: &mut Ping,
        config: &ProcessConfig,
        profile: &SoundSpeedProfile,
    ) -> StageResult<usize> {
        let change = AttitudeChange::of(ping, config);
        let draft = ping.platform.draft;
        let lever = ping.lever_heave;
        let surface_velocity = ping.surface_velocity;
        let mut nulled = 0;
        for beam in ping.beams.iter_mut().filter(|b| !b.flag.is_null()) {
            if beam.travel_time <= 0.0 {
                beam.flag = BeamFlag::Null;
                nulled += 1;
                continue;
            }
            let launch = beam.heave + draft + lever;
            let (theta, phi) = change.apply(beam.angle, beam.angle_forward, config);
            let ray = compute_depth(
                profile,
                launch,
                theta,
                0.5 * beam.travel_time,
                config.svp.angle_mode,
                surface_velocity,
                beam.angle_null,
            );
            match ray {
                Ok(ray) if !ray.status.is_failure() => {
                    let (sp, cp) = phi.to_radians().sin_cos();
                    beam.acrosstrack = ray.range * cp;
                    beam.alongtrack = ray.range * sp + beam.alongtrack_offset;
                    beam.depth = if config.svp.corrected {
                        ray.depth
                    } else {
                        profile.convert_reference(ray.depth, launch, false)
                    };
                }
                Ok(ray) => {
                    debug!("ray at {:.6} failed with {:?}", ping.time, ray.status);
                    beam.flag = BeamFlag::Null;
                    nulled += 1;
                }
                Err(err) => {
                    debug!("ray at {:.6} not traced: {}", ping.time, err);
                    beam.flag = BeamFlag::Null;
                    nulled += 1;
                }
            }
        }
        Ok(nulled)
    }

    /// Keeps each sounding's slant range and turns its look vector.
    fn rotate(ping: &mut Ping, config: &ProcessConfig, original_heave: &[f64]) {
        let change = AttitudeChange::of(ping, config);
        let old_draft = ping.reported.draft;
        let offset = ping.platform.draft + ping.lever_heave;
        for (beam, heave) in ping
            .beams
            .iter_mut()
            .zip(original_heave)
            .filter(|(b, _)| !b.flag.is_null())
        {
            let down = beam.depth - old_draft - heave;
            let along = beam.alongtrack - beam.alongtrack_offset;
            let range = (beam.acrosstrack.powi(2) + along.powi(2) + down.powi(2)).sqrt();
            let (theta, phi) = xyz_to_takeoff(beam.acrosstrack, along, down);
            let (theta, phi) = change.apply(theta, phi, config);
            let (st, ct) = theta.to_radians().sin_cos();
            let (sp, cp) = phi.to_radians().sin_cos();
            beam.acrosstrack = range * st * cp;
            beam.alongtrack = range * st * sp + beam.alongtrack_offset;
            beam.depth = range * ct + offset + beam.heave;
        }
    }

    /// Shifts depths by the net vertical change of the sonar.
    fn offset(ping: &mut Ping, original_heave: &[f64]) {
        let draft_change = ping.platform.draft - ping.reported.draft + ping.lever_heave;
        for (beam, heave) in ping
            .beams
            .iter_mut()
            .zip(original_heave)
            .filter(|(b, _)| !b.flag.is_null())
        {
            beam.depth += draft_change + (beam.heave - heave);
        }
    }
}

impl Default for BathymetryStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for BathymetryStage {
    fn name(&self) -> &'static str {
        "bathymetry"
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        self.mode = effective_recalc(config);
        self.profile = match config.svp.mode {
            SvpMode::Off => None,
            SvpMode::On | SvpMode::ReferenceOnly => {
                let path = config.svp.file.as_ref().ok_or_else(|| {
                    StageError::Configuration("sound speed profile enabled without a file".into())
                })?;
                Some(SoundSpeedProfile::load(path)?)
            }
        };
        if self.mode == BathRecalcMode::Raytrace && self.profile.is_none() {
            return Err(StageError::Configuration(
                "raytrace recalculation needs a sound speed profile".into(),
            ));
        }
        self.statics = match config.static_correction.mode {
            StaticMode::Off => None,
            mode => {
                let path = config.static_correction.file.as_ref().ok_or_else(|| {
                    StageError::Configuration("static correction enabled without a file".into())
                })?;
                Some(StaticTable::load(path, mode, config.limits.max_beams)?)
            }
        };
        self.last_surface_velocity = None;
        self.logger
            .record(&format!("recalculation mode {:?}", self.mode));
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        if let Some(beam) = ping
            .beams
            .iter()
            .filter(|b| !b.flag.is_null())
            .find(|b| !b.travel_time.is_finite() || b.travel_time > MAX_TRAVEL_TIME)
        {
            return Err(StageError::InvalidInput(format!(
                "travel time {} out of range at {:.6}",
                beam.travel_time, ping.time
            )));
        }

        let original_heave: Vec<f64> = ping.beams.iter().map(|b| b.heave).collect();
        if self.mode == BathRecalcMode::Raytrace && !ping.has_travel_times {
            Self::estimate_travel_times(ping);
        }

        if ping.surface_velocity > 0.0 {
            self.last_surface_velocity = Some(ping.surface_velocity);
        } else if let Some(previous) = self.last_surface_velocity {
            ping.surface_velocity = previous;
        }
        match config.svp.surface_velocity {
            SurfaceVelocityMode::Off => {}
            SurfaceVelocityMode::Set => ping.surface_velocity = config.svp.surface_velocity_value,
            SurfaceVelocityMode::Offset => {
                ping.surface_velocity += config.svp.surface_velocity_value
            }
        }

        let heave_change = ping.platform.heave - ping.reported.heave;
        for beam in &mut ping.beams {
            beam.heave = config.heave.adjust(beam.heave + heave_change);
            if config.traveltime.mode == TravelTimeMode::Multiply {
                beam.travel_time *= config.traveltime.multiply;
            }
        }

        let mut output = StageOutput::default();
        match self.mode {
            BathRecalcMode::Raytrace => {
                if let Some(profile) = self.profile.as_ref() {
                    output.beams_nulled = Self::raytrace(ping, config, profile)?;
                }
            }
            BathRecalcMode::Rotate => Self::rotate(ping, config, &original_heave),
            BathRecalcMode::Offset => Self::offset(ping, &original_heave),
            BathRecalcMode::Off => {}
        }

        if config.svp.mode == SvpMode::ReferenceOnly && self.mode != BathRecalcMode::Raytrace {
            if let Some(profile) = self.profile.as_ref() {
                let offset = ping.platform.draft + ping.lever_heave;
                for beam in ping.beams.iter_mut().filter(|b| !b.flag.is_null()) {
                    let launch = offset + beam.heave;
                    // input is taken to be in the opposite convention
                    beam.depth = profile.convert_reference(beam.depth, launch, config.svp.corrected);
                }
            }
        }

        if let Some(statics) = self.statics.as_ref() {
            let sonar_depth = ping.platform.draft + ping.lever_heave;
            for (i, beam) in ping
                .beams
                .iter_mut()
                .enumerate()
                .filter(|(_, b)| !b.flag.is_null())
            {
                let altitude = beam.depth - sonar_depth - beam.heave;
                let angle = beam.acrosstrack.atan2(altitude).to_degrees();
                beam.depth += statics.offset(i, angle);
            }
        }

        let recomputed = self.mode != BathRecalcMode::Off
            || self.statics.is_some()
            || config.svp.mode == SvpMode::ReferenceOnly;
        if recomputed {
            output.beams_changed = ping.beams.len() - output.beams_nulled;
        }
        Ok(output)
    }

    fn cleanup(&mut self) {
        self.config = None;
        self.profile = None;
        self.statics = None;
        self.last_surface_velocity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeaveMode, RollBiasMode};
    use crate::ping::{Beam, Platform};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn profile_file(velocity: f64) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        write!(temp, "0 {v}\n5000 {v}\n", v = velocity).unwrap();
        temp
    }

    fn swath_ping() -> Ping {
        let beams = [-45.0f64, -20.0, 0.0, 20.0, 45.0]
            .iter()
            .map(|&angle| {
                let slant = 100.0 / angle.to_radians().cos();
                Beam {
                    travel_time: 2.0 * slant / 1500.0,
                    angle: angle.abs(),
                    angle_forward: if angle < 0.0 { 180.0 } else { 0.0 },
                    ..Beam::sounding(102.0, 100.0 * angle.to_radians().tan(), 0.0)
                }
            })
            .collect();
        let mut ping = Ping {
            time: 1000.0,
            platform: Platform {
                draft: 2.0,
                ..Default::default()
            },
            surface_velocity: 1500.0,
            has_travel_times: true,
            beams,
            ..Default::default()
        };
        ping.begin_processing(0);
        ping
    }

    fn raytrace_config(profile: &NamedTempFile) -> ProcessConfig {
        let mut config = ProcessConfig::default();
        config.svp.mode = SvpMode::On;
        config.svp.file = Some(profile.path().to_path_buf());
        config.bathymetry.recalc = BathRecalcMode::Raytrace;
        config
    }

    #[test]
    fn raytrace_in_constant_profile_matches_geometry() {
        let profile = profile_file(1500.0);
        let mut stage = BathymetryStage::new();
        stage.initialize(&raytrace_config(&profile)).unwrap();
        let mut ping = swath_ping();
        let expected = ping.clone();
        let output = stage.execute(&mut ping).unwrap();
        assert_eq!(output.beams_nulled, 0);
        for (beam, want) in ping.beams.iter().zip(&expected.beams) {
            assert!((beam.depth - want.depth).abs() < 1e-6);
            assert!((beam.acrosstrack - want.acrosstrack).abs() < 1e-6);
        }
        stage.cleanup();
    }

    #[test]
    fn zero_travel_time_nulls_beam() {
        let profile = profile_file(1500.0);
        let mut stage = BathymetryStage::new();
        stage.initialize(&raytrace_config(&profile)).unwrap();
        let mut ping = swath_ping();
        ping.beams[1].travel_time = 0.0;
        let output = stage.execute(&mut ping).unwrap();
        assert_eq!(output.beams_nulled, 1);
        assert_eq!(ping.beams[1].flag, BeamFlag::Null);
    }

    #[test]
    fn absurd_travel_time_rejects_ping() {
        let profile = profile_file(1500.0);
        let mut stage = BathymetryStage::new();
        stage.initialize(&raytrace_config(&profile)).unwrap();
        let mut ping = swath_ping();
        ping.beams[0].travel_time = f64::NAN;
        let err = stage.execute(&mut ping).unwrap_err();
        assert!(err.rejects_ping());
    }

    #[test]
    fn null_beams_are_not_travel_time_checked() {
        let profile = profile_file(1500.0);
        let mut stage = BathymetryStage::new();
        stage.initialize(&raytrace_config(&profile)).unwrap();
        let mut ping = swath_ping();
        ping.beams[0].flag = BeamFlag::Null;
        ping.beams[0].travel_time = -1.0;
        ping.beams[4].flag = BeamFlag::Null;
        ping.beams[4].travel_time = 99.0;
        let output = stage.execute(&mut ping).unwrap();
        assert_eq!(output.beams_nulled, 0);
        assert!((ping.beams[2].depth - 102.0).abs() < 1e-6);
    }

    #[test]
    fn missing_travel_times_are_estimated() {
        let profile = profile_file(1500.0);
        let mut stage = BathymetryStage::new();
        stage.initialize(&raytrace_config(&profile)).unwrap();
        let mut ping = swath_ping();
        ping.has_travel_times = false;
        ping.surface_velocity = 0.0;
        for beam in &mut ping.beams {
            beam.travel_time = 0.0;
            beam.angle = 0.0;
        }
        let expected = ping.clone();
        stage.execute(&mut ping).unwrap();
        assert!(ping.has_travel_times);
        assert_eq!(ping.surface_velocity, 1500.0);
        for (beam, want) in ping.beams.iter().zip(&expected.beams) {
            assert!((beam.depth - want.depth).abs() < 1e-6);
            assert!((beam.acrosstrack - want.acrosstrack).abs() < 1e-6);
        }
    }

    #[test]
    fn raytrace_without_profile_is_configuration_error() {
        let mut config = ProcessConfig::default();
        config.bathymetry.recalc = BathRecalcMode::Raytrace;
        assert!(matches!(
            BathymetryStage::new().initialize(&config),
            Err(StageError::Configuration(_))
        ));
    }

    #[test]
    fn offset_mode_without_change_is_identity() {
        let mut config = ProcessConfig::default();
        config.bathymetry.recalc = BathRecalcMode::Offset;
        let mut stage = BathymetryStage::new();
        stage.initialize(&config).unwrap();
        let mut ping = swath_ping();
        let before = ping.clone();
        stage.execute(&mut ping).unwrap();
        assert_eq!(ping.beams, before.beams);
    }

    #[test]
    fn offset_mode_applies_draft_and_heave_changes() {
        let mut config = ProcessConfig::default();
        config.bathymetry.recalc = BathRecalcMode::Offset;
        config.heave.mode = HeaveMode::Offset;
        config.heave.offset = 0.1;
        let mut stage = BathymetryStage::new();
        stage.initialize(&config).unwrap();
        let mut ping = swath_ping();
        ping.platform.draft += 0.5;
        stage.execute(&mut ping).unwrap();
        assert!((ping.beams[2].depth - 102.6).abs() < 1e-12);
    }

    #[test]
    fn rotate_without_change_keeps_soundings() {
        let mut config = ProcessConfig::default();
        config.bathymetry.recalc = BathRecalcMode::Rotate;
        let mut stage = BathymetryStage::new();
        stage.initialize(&config).unwrap();
        let mut ping = swath_ping();
        let before = ping.clone();
        stage.execute(&mut ping).unwrap();
        for (beam, want) in ping.beams.iter().zip(&before.beams) {
            assert!((beam.depth - want.depth).abs() < 1e-9);
            assert!((beam.acrosstrack - want.acrosstrack).abs() < 1e-9);
        }
    }

    #[test]
    fn roll_bias_rotates_nadir_beam_to_port() {
        let mut config = ProcessConfig::default();
        config.bathymetry.recalc = BathRecalcMode::Rotate;
        config.roll_bias.mode = RollBiasMode::Single;
        config.roll_bias.single = 1.0;
        let mut stage = BathymetryStage::new();
        stage.initialize(&config).unwrap();
        let mut ping = swath_ping();
        stage.execute(&mut ping).unwrap();
        let nadir = &ping.beams[2];
        assert!((nadir.acrosstrack + 100.0 * 1f64.to_radians().sin()).abs() < 1e-6);
        assert!((nadir.depth - (2.0 + 100.0 * 1f64.to_radians().cos())).abs() < 1e-6);
    }

    #[test]
    fn per_beam_statics_are_added() {
        let mut statics = NamedTempFile::new().unwrap();
        statics.write_all(b"# beam offset\n2 0.75\n4 -0.5\n").unwrap();
        let mut config = ProcessConfig::default();
        config.static_correction.mode = StaticMode::PerBeam;
        config.static_correction.file = Some(statics.path().to_path_buf());
        let mut stage = BathymetryStage::new();
        stage.initialize(&config).unwrap();
        let mut ping = swath_ping();
        stage.execute(&mut ping).unwrap();
        assert_eq!(ping.beams[2].depth, 102.75);
        assert_eq!(ping.beams[4].depth, 101.5);
        assert_eq!(ping.beams[0].depth, 102.0);
    }

    #[test]
    fn bad_static_beam_numbers_are_configuration_errors() {
        for line in ["1e30 0.5", "2.5 0.1", "-1 0.2", "nan 0.3", "1024 0.1"] {
            let mut statics = NamedTempFile::new().unwrap();
            writeln!(statics, "{}", line).unwrap();
            let loaded = StaticTable::load(statics.path(), StaticMode::PerBeam, 1024);
            assert!(matches!(loaded, Err(StageError::Configuration(_))), "{}", line);
        }
        let mut statics = NamedTempFile::new().unwrap();
        writeln!(statics, "1023 0.1").unwrap();
        let table = StaticTable::load(statics.path(), StaticMode::PerBeam, 1024).unwrap();
        assert_eq!(table.offset(1023, 0.0), 0.1);
    }

    #[test]
    fn tide_promotes_offset_mode() {
        let mut config = ProcessConfig::default();
        assert_eq!(effective_recalc(&config), BathRecalcMode::Off);
        config.tide.enabled = true;
        assert_eq!(effective_recalc(&config), BathRecalcMode::Offset);
    }
}
