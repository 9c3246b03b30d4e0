use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use swathcore::config::{BathRecalcMode, ProcessConfig, SvpMode};
use swathcore::edit::{EditAction, EditFileWriter, EsfHeader, EsfMode, RawEdit};
use swathcore::math::coor_scale;
use swathcore::ping::{Beam, Pixel, Ping, Platform, Record};
use swathcore::telemetry::Identity;

/// One edit written to the synthetic edit-save file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyEdit {
    pub ping: usize,
    pub beam: usize,
    /// Edit-save action code (1 flag, 2 unflag, 3 zero, 4 filter, 5 sonar).
    pub action: i32,
}

/// Straight-line survey over a flat seafloor in a constant-velocity ocean.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub name: String,
    pub pings: usize,
    pub beams: usize,
    pub pixels: usize,
    /// Outermost beam angle from vertical, degrees.
    pub swath_angle: f64,
    /// Seafloor depth below the sea surface, metres.
    pub water_depth: f64,
    pub draft: f64,
    pub velocity: f64,
    pub start_time: f64,
    pub ping_interval: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub heading: f64,
    /// m/s
    pub speed: f64,
    pub amplitude_noise: f64,
    pub seed: u64,
    pub edits: Vec<SurveyEdit>,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            name: "line0001".into(),
            pings: 10,
            beams: 11,
            pixels: 32,
            swath_angle: 45.0,
            water_depth: 100.0,
            draft: 2.0,
            velocity: 1500.0,
            start_time: 1_072_915_200.0,
            ping_interval: 1.0,
            longitude: -70.5,
            latitude: 41.5,
            heading: 45.0,
            speed: 4.0,
            amplitude_noise: 0.5,
            seed: 0,
            edits: vec![SurveyEdit {
                ping: 5,
                beam: 3,
                action: 1,
            }],
        }
    }
}

impl SurveyConfig {
    fn beam_angle(&self, index: usize) -> f64 {
        if self.beams < 2 {
            return 0.0;
        }
        -self.swath_angle + 2.0 * self.swath_angle * index as f64 / (self.beams - 1) as f64
    }

    fn jitter(&self, rng: &mut StdRng) -> f64 {
        if self.amplitude_noise > 0.0 {
            rng.gen_range(-self.amplitude_noise..self.amplitude_noise)
        } else {
            0.0
        }
    }
}

/// Files written by [`generate`].
#[derive(Debug, Clone)]
pub struct SurveyFiles {
    pub input: PathBuf,
    pub parameters: PathBuf,
    pub svp: PathBuf,
    pub edits: PathBuf,
}

pub fn build_pings(config: &SurveyConfig) -> anyhow::Result<Vec<Ping>> {
    let altitude = config.water_depth - config.draft;
    if altitude <= 0.0 || config.velocity <= 0.0 {
        anyhow::bail!(
            "survey needs positive altitude and velocity, got {} m and {} m/s",
            altitude,
            config.velocity
        );
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (mtodeglon, mtodeglat) = coor_scale(config.latitude);
    let (sh, ch) = config.heading.to_radians().sin_cos();
    let swath_half_width = altitude * config.swath_angle.to_radians().tan();

    let mut pings = Vec::with_capacity(config.pings);
    for index in 0..config.pings {
        let run = config.speed * config.ping_interval * index as f64;
        let platform = Platform {
            longitude: config.longitude + run * sh * mtodeglon,
            latitude: config.latitude + run * ch * mtodeglat,
            speed: 3.6 * config.speed,
            heading: config.heading,
            draft: config.draft,
            ..Default::default()
        };
        let beams = (0..config.beams)
            .map(|b| {
                let angle = config.beam_angle(b);
                let slant = altitude / angle.to_radians().cos();
                Beam {
                    travel_time: 2.0 * slant / config.velocity,
                    angle: angle.abs(),
                    angle_forward: if angle < 0.0 { 180.0 } else { 0.0 },
                    amplitude: -20.0 - angle.abs() / 3.0 + config.jitter(&mut rng),
                    ..Beam::sounding(
                        config.water_depth,
                        altitude * angle.to_radians().tan(),
                        0.0,
                    )
                }
            })
            .collect();
        let pixels = (0..config.pixels)
            .map(|p| {
                let fraction = (p as f64 + 0.5) / config.pixels as f64;
                Pixel {
                    intensity: Some(-30.0 + config.jitter(&mut rng)),
                    acrosstrack: swath_half_width * (2.0 * fraction - 1.0),
                    alongtrack: 0.0,
                }
            })
            .collect();
        pings.push(Ping {
            time: config.start_time + config.ping_interval * index as f64,
            platform,
            altitude,
            surface_velocity: config.velocity,
            has_travel_times: true,
            beams,
            pixels,
            ..Default::default()
        });
    }
    Ok(pings)
}

/// Processing parameters matching the generated survey.
pub fn survey_parameters(config: &SurveyConfig, files: &SurveyFiles) -> ProcessConfig {
    let mut parameters = ProcessConfig::default();
    let relative = |path: &Path| path.file_name().map(PathBuf::from);
    parameters.svp.mode = SvpMode::On;
    parameters.svp.file = relative(&files.svp);
    parameters.bathymetry.recalc = BathRecalcMode::Raytrace;
    parameters.edit.enabled = !config.edits.is_empty();
    parameters.edit.file = relative(&files.edits);
    parameters.metadata.comment = Some(format!("synthetic survey {}", config.name));
    parameters
}

/// Writes a swath file, its parameter file, a velocity profile and an
/// edit-save file into `dir`.
pub fn generate(dir: &Path, config: &SurveyConfig) -> anyhow::Result<SurveyFiles> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let input = dir.join(format!("{}.jsonl", config.name));
    let files = SurveyFiles {
        parameters: crate::workflow::config::parameter_path(&input),
        svp: dir.join(format!("{}.svp", config.name)),
        edits: dir.join(format!("{}.esf", config.name)),
        input,
    };
    let pings = build_pings(config)?;

    let mut writer = BufWriter::new(
        fs::File::create(&files.input)
            .with_context(|| format!("creating {}", files.input.display()))?,
    );
    let comment = Record::Comment {
        text: format!("synthetic survey {} seed {}", config.name, config.seed),
    };
    serde_json::to_writer(&mut writer, &comment)?;
    writer.write_all(b"\n")?;
    for ping in &pings {
        serde_json::to_writer(&mut writer, &Record::Ping(ping.clone()))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    fs::write(
        &files.svp,
        format!("# constant velocity\n0.0 {v}\n{d} {v}\n", v = config.velocity, d = 5000.0),
    )
    .with_context(|| format!("writing {}", files.svp.display()))?;

    let identity = Identity::current("swathproc", env!("CARGO_PKG_VERSION"));
    let header = EsfHeader::new(EsfMode::Explicit, &identity);
    let mut edits = EditFileWriter::create(&files.edits, &header)
        .with_context(|| format!("creating {}", files.edits.display()))?;
    for edit in &config.edits {
        let ping = pings
            .get(edit.ping)
            .with_context(|| format!("edit targets missing ping {}", edit.ping))?;
        let action = EditAction::from_code(edit.action)
            .with_context(|| format!("unknown edit action {}", edit.action))?;
        edits.push(&RawEdit::new(ping.time, edit.beam, 0, action))?;
    }
    edits.finish()?;

    let yaml = serde_yaml::to_string(&survey_parameters(config, &files))?;
    fs::write(&files.parameters, yaml)
        .with_context(|| format!("writing {}", files.parameters.display()))?;
    Ok(files)
}
