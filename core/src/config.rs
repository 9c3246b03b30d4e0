//! Per-file processing parameters.
//!
//! Every section defaults to "off" so a parameter file only names what it
//! enables. The driver deserializes this record from YAML.

use crate::ping::Limits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub output: Option<PathBuf>,
    /// -1: longitudes in -360..0, 0: -180..180, 1: 0..360.
    pub lonflip: i32,
    pub nav: NavMergeConfig,
    pub nav_adjust: NavAdjustConfig,
    pub attitude: SeriesMergeConfig,
    pub sensordepth: SeriesMergeConfig,
    pub tide: SeriesMergeConfig,
    pub nav_shift: NavShiftConfig,
    pub draft: DraftConfig,
    pub heave: HeaveConfig,
    pub lever: LeverConfig,
    pub roll_bias: RollBiasConfig,
    pub pitch_bias: PitchBiasConfig,
    pub heading: HeadingConfig,
    pub traveltime: TravelTimeConfig,
    pub svp: SvpConfig,
    pub bathymetry: BathymetryConfig,
    pub static_correction: StaticConfig,
    pub amplitude: CorrectionConfig,
    pub sidescan: CorrectionConfig,
    pub sidescan_recalc: SidescanRecalcConfig,
    pub cuts: Vec<DataCut>,
    pub edit: EditConfig,
    pub metadata: Metadata,
    pub limits: Limits,
}

impl ProcessConfig {
    /// Every auxiliary file an enabled stage reads.
    pub fn input_dependencies(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut push = |enabled: bool, file: &Option<PathBuf>| {
            if let (true, Some(path)) = (enabled, file) {
                files.push(path.clone());
            }
        };
        push(self.nav.enabled, &self.nav.file);
        push(self.nav_adjust.mode != NavAdjustMode::Off, &self.nav_adjust.file);
        push(self.attitude.enabled, &self.attitude.file);
        push(self.sensordepth.enabled, &self.sensordepth.file);
        push(self.tide.enabled, &self.tide.file);
        push(self.svp.mode != SvpMode::Off, &self.svp.file);
        push(
            self.static_correction.mode != StaticMode::Off,
            &self.static_correction.file,
        );
        push(self.amplitude.enabled, &self.amplitude.file);
        push(self.sidescan.enabled, &self.sidescan.file);
        push(self.edit.enabled, &self.edit.file);
        files
    }

    /// Topography grids needed by the correction stage.
    pub fn topography_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for section in [&self.amplitude, &self.sidescan] {
            if section.enabled && section.slope.uses_topography() {
                if let Some(path) = &section.topography_file {
                    if !files.contains(path) {
                        files.push(path.clone());
                    }
                }
            }
        }
        files
    }

    pub fn attitude_merged(&self) -> bool {
        self.attitude.enabled || (self.nav.enabled && self.nav.attitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpAlgorithm {
    Linear,
    #[default]
    Spline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMergeConfig {
    pub enabled: bool,
    pub file: Option<PathBuf>,
    pub format: u8,
    pub algorithm: InterpAlgorithm,
    pub time_shift: f64,
    pub heading: bool,
    pub speed: bool,
    pub draft: bool,
    pub attitude: bool,
}

impl Default for NavMergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: None,
            format: 9,
            algorithm: InterpAlgorithm::Spline,
            time_shift: 0.0,
            heading: false,
            speed: false,
            draft: false,
            attitude: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NavAdjustMode {
    #[default]
    Off,
    LonLat,
    LonLatDepth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NavAdjustConfig {
    pub mode: NavAdjustMode,
    pub file: Option<PathBuf>,
    pub algorithm: InterpAlgorithm,
}

/// Attitude, sensordepth and tide share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesMergeConfig {
    pub enabled: bool,
    pub file: Option<PathBuf>,
    pub format: u8,
}

impl Default for SeriesMergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: None,
            format: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NavShiftConfig {
    pub enabled: bool,
    /// Position sensor offsets from the reference point, metres.
    pub offset_x: f64,
    pub offset_y: f64,
    pub shift_x: f64,
    pub shift_y: f64,
    pub shift_lon: f64,
    pub shift_lat: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DraftMode {
    #[default]
    Off,
    Set,
    Offset,
    Multiply,
    MultiplyOffset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub mode: DraftMode,
    pub value: f64,
    pub offset: f64,
    pub multiply: f64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            mode: DraftMode::Off,
            value: 0.0,
            offset: 0.0,
            multiply: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeaveMode {
    #[default]
    Off,
    Offset,
    Multiply,
    MultiplyOffset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaveConfig {
    pub mode: HeaveMode,
    pub offset: f64,
    pub multiply: f64,
}

impl Default for HeaveConfig {
    fn default() -> Self {
        Self {
            mode: HeaveMode::Off,
            offset: 0.0,
            multiply: 1.0,
        }
    }
}

impl HeaveConfig {
    pub fn adjust(&self, heave: f64) -> f64 {
        match self.mode {
            HeaveMode::Off => heave,
            HeaveMode::Offset => heave + self.offset,
            HeaveMode::Multiply => heave * self.multiply,
            HeaveMode::MultiplyOffset => heave * self.multiply + self.offset,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverConfig {
    pub enabled: bool,
    /// Sonar (x starboard, y forward, z down) relative to the reference point.
    pub sonar_offset: [f64; 3],
    /// Motion sensor position in the same frame.
    pub vru_offset: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollBiasMode {
    #[default]
    Off,
    Single,
    PortStarboard,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollBiasConfig {
    pub mode: RollBiasMode,
    pub single: f64,
    pub port: f64,
    pub starboard: f64,
}

impl RollBiasConfig {
    /// Bias in degrees for a beam on the given side.
    pub fn bias(&self, starboard: bool) -> f64 {
        match self.mode {
            RollBiasMode::Off => 0.0,
            RollBiasMode::Single => self.single,
            RollBiasMode::PortStarboard if starboard => self.starboard,
            RollBiasMode::PortStarboard => self.port,
        }
    }

    /// Side-independent bias for platform-level calculations.
    pub fn mean_bias(&self) -> f64 {
        match self.mode {
            RollBiasMode::Off => 0.0,
            RollBiasMode::Single => self.single,
            RollBiasMode::PortStarboard => 0.5 * (self.port + self.starboard),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchBiasConfig {
    pub enabled: bool,
    pub bias: f64,
}

impl PitchBiasConfig {
    pub fn bias(&self) -> f64 {
        if self.enabled {
            self.bias
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeadingMode {
    #[default]
    Off,
    CourseMadeGood,
    Offset,
    CourseMadeGoodOffset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    pub mode: HeadingMode,
    pub offset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TravelTimeMode {
    #[default]
    Off,
    Multiply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelTimeConfig {
    pub mode: TravelTimeMode,
    pub multiply: f64,
}

impl Default for TravelTimeConfig {
    fn default() -> Self {
        Self {
            mode: TravelTimeMode::Off,
            multiply: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SvpMode {
    #[default]
    Off,
    On,
    /// Only convert the sound-speed reference of existing depths.
    ReferenceOnly,
}

/// Take-off angle policy before raytracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AngleMode {
    NoCorrection,
    #[default]
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceVelocityMode {
    #[default]
    Off,
    Set,
    Offset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvpConfig {
    pub mode: SvpMode,
    pub file: Option<PathBuf>,
    pub angle_mode: AngleMode,
    /// Output depths are sound-speed corrected when true.
    pub corrected: bool,
    pub surface_velocity: SurfaceVelocityMode,
    pub surface_velocity_value: f64,
}

impl Default for SvpConfig {
    fn default() -> Self {
        Self {
            mode: SvpMode::Off,
            file: None,
            angle_mode: AngleMode::Correct,
            corrected: true,
            surface_velocity: SurfaceVelocityMode::Off,
            surface_velocity_value: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BathRecalcMode {
    #[default]
    Off,
    Raytrace,
    Rotate,
    Offset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BathymetryConfig {
    pub recalc: BathRecalcMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaticMode {
    #[default]
    Off,
    PerBeam,
    PerAngle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub mode: StaticMode,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Log-domain values: subtract the table, add the reference.
    #[default]
    Subtract,
    /// Linear values: divide by the table, multiply by the reference.
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Symmetry {
    #[default]
    Symmetric,
    Asymmetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlopeSource {
    Ignore,
    #[default]
    InSwath,
    Topography,
    TopographySlope,
}

impl SlopeSource {
    pub fn uses_topography(self) -> bool {
        matches!(self, SlopeSource::Topography | SlopeSource::TopographySlope)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub enabled: bool,
    pub file: Option<PathBuf>,
    pub apply: ApplyMode,
    pub symmetry: Symmetry,
    pub reference_angle: f64,
    pub slope: SlopeSource,
    pub topography_file: Option<PathBuf>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: None,
            apply: ApplyMode::Subtract,
            symmetry: Symmetry::Symmetric,
            reference_angle: 30.0,
            slope: SlopeSource::InSwath,
            topography_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidescanRecalcConfig {
    pub enabled: bool,
    /// Metres per pixel; zero derives it from the swath width.
    pub pixel_size: f64,
    /// Total swath width in metres; zero uses the bathymetry extent.
    pub swath_width: f64,
    /// Largest gap, in pixels, filled by interpolation.
    pub interpolate: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutKind {
    Bathymetry,
    Amplitude,
    Sidescan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    Number,
    Distance,
    Speed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCut {
    pub kind: CutKind,
    pub mode: CutMode,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    pub enabled: bool,
    pub file: Option<PathBuf>,
}

/// Free-text survey metadata emitted as comments at the top of the output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub vessel: Option<String>,
    pub institution: Option<String>,
    pub platform: Option<String>,
    pub sonar: Option<String>,
    pub operator: Option<String>,
    pub cruise_id: Option<String>,
    pub cruise_name: Option<String>,
    pub pi: Option<String>,
    pub client: Option<String>,
    pub comment: Option<String>,
}

impl Metadata {
    pub fn comment_lines(&self) -> Vec<String> {
        let fields = [
            ("METAVESSEL", &self.vessel),
            ("METAINSTITUTION", &self.institution),
            ("METAPLATFORM", &self.platform),
            ("METASONAR", &self.sonar),
            ("METAOPERATOR", &self.operator),
            ("METACRUISEID", &self.cruise_id),
            ("METACRUISENAME", &self.cruise_name),
            ("METAPI", &self.pi),
            ("METACLIENT", &self.client),
            ("METACOMMENT", &self.comment),
        ];
        fields
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{}:{}", key, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_only_list_enabled_sections() {
        let mut config = ProcessConfig::default();
        config.nav.file = Some(PathBuf::from("line.nav"));
        assert!(config.input_dependencies().is_empty());

        config.nav.enabled = true;
        config.edit.enabled = true;
        config.edit.file = Some(PathBuf::from("line.esf"));
        assert_eq!(
            config.input_dependencies(),
            vec![PathBuf::from("line.nav"), PathBuf::from("line.esf")]
        );
    }

    #[test]
    fn topography_files_are_deduplicated() {
        let mut config = ProcessConfig::default();
        for section in [&mut config.amplitude, &mut config.sidescan] {
            section.enabled = true;
            section.slope = SlopeSource::Topography;
            section.topography_file = Some(PathBuf::from("area.grd"));
        }
        assert_eq!(config.topography_files(), vec![PathBuf::from("area.grd")]);
    }

    #[test]
    fn roll_bias_picks_side() {
        let bias = RollBiasConfig {
            mode: RollBiasMode::PortStarboard,
            single: 0.0,
            port: -0.4,
            starboard: 0.2,
        };
        assert_eq!(bias.bias(true), 0.2);
        assert_eq!(bias.bias(false), -0.4);
        assert!((bias.mean_bias() + 0.1).abs() < 1e-12);
    }

    #[test]
    fn metadata_lines_skip_missing_fields() {
        let metadata = Metadata {
            vessel: Some("R/V Example".into()),
            ..Default::default()
        };
        assert_eq!(metadata.comment_lines(), vec!["METAVESSEL:R/V Example"]);
    }
}
