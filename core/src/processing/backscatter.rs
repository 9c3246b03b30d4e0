use crate::config::{ApplyMode, CorrectionConfig, SlopeSource};
use crate::correction::{
    CorrectionSeries, CorrectionTable, Footprint, SwathProfile, TopoGrid, SMOOTH_WIDTH,
};
use crate::ping::Ping;
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::telemetry::log::LogManager;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One configured correction target (amplitude or sidescan).
struct Corrector {
    series: CorrectionSeries,
    apply: ApplyMode,
    reference_angle: f64,
    slope: SlopeSource,
    grid: Option<Arc<TopoGrid>>,
}

/// Per-ping context shared by every sample of the swath.
struct Geometry<'a> {
    ping: &'a Ping,
    profile: SwathProfile,
}

impl Corrector {
    fn build(
        label: &str,
        config: &CorrectionConfig,
        grids: &HashMap<PathBuf, Arc<TopoGrid>>,
    ) -> StageResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let path = config.file.as_ref().ok_or_else(|| {
            StageError::Configuration(format!("{} correction enabled without a table file", label))
        })?;
        let series = CorrectionSeries::load(path, config.symmetry)?;
        let grid = if config.slope.uses_topography() {
            let grid_path = config.topography_file.as_ref().ok_or_else(|| {
                StageError::Configuration(format!(
                    "{} correction uses topography without a grid file",
                    label
                ))
            })?;
            let grid = grids.get(grid_path).ok_or_else(|| {
                StageError::Configuration(format!("grid {} not loaded", grid_path.display()))
            })?;
            Some(Arc::clone(grid))
        } else {
            None
        };
        Ok(Some(Self {
            series,
            apply: config.apply,
            reference_angle: config.reference_angle,
            slope: config.slope,
            grid,
        }))
    }

    /// Incidence angle for a sample, and whether it fell back to a flat bottom.
    fn angle(&self, geometry: &Geometry<'_>, across: f64, along: f64) -> (f64, bool) {
        match (self.slope, &self.grid) {
            (SlopeSource::Ignore, _) => (geometry.profile.incidence_angle(across, false), false),
            (SlopeSource::InSwath, _) => (
                geometry.profile.incidence_angle(across, true),
                geometry.profile.is_empty(),
            ),
            (_, Some(grid)) => {
                let platform = &geometry.ping.platform;
                let footprint = Footprint {
                    longitude: platform.longitude,
                    latitude: platform.latitude,
                    heading: platform.heading,
                    sensor_depth: platform.sensor_depth(),
                    acrosstrack: across,
                    alongtrack: along,
                };
                let use_slope = self.slope == SlopeSource::TopographySlope;
                match grid.incidence_angle(&footprint, use_slope) {
                    Some((angle, _)) => (angle, false),
                    None => (geometry.profile.incidence_angle(across, false), true),
                }
            }
            (_, None) => (geometry.profile.incidence_angle(across, false), true),
        }
    }

    fn table(&self, ping: &Ping) -> (CorrectionTable, f64) {
        let table = self.series.table_at(ping.time);
        let reference = table.reference(self.reference_angle);
        (table, reference)
    }
}

/// Grazing-angle correction of beam amplitude and sidescan.
pub struct CorrectionStage {
    grids: HashMap<PathBuf, Arc<TopoGrid>>,
    amplitude: Option<Corrector>,
    sidescan: Option<Corrector>,
    initialized: bool,
    degraded: usize,
    logger: LogManager,
}

impl CorrectionStage {
    /// `grids` holds every topography grid the configuration may reference.
    pub fn new(grids: HashMap<PathBuf, Arc<TopoGrid>>) -> Self {
        Self {
            grids,
            amplitude: None,
            sidescan: None,
            initialized: false,
            degraded: 0,
            logger: LogManager::new("correction"),
        }
    }

    /// Samples corrected with flat-bottom geometry so far.
    pub fn degraded(&self) -> usize {
        self.degraded
    }
}

impl ProcessingStage for CorrectionStage {
    fn name(&self) -> &'static str {
        "correction"
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        self.amplitude = Corrector::build("amplitude", &config.amplitude, &self.grids)?;
        self.sidescan = Corrector::build("sidescan", &config.sidescan, &self.grids)?;
        for (label, corrector) in [("amplitude", &self.amplitude), ("sidescan", &self.sidescan)] {
            if let Some(corrector) = corrector {
                self.logger.record(&format!(
                    "{} correction with {} tables, slope {:?}",
                    label,
                    corrector.series.len(),
                    corrector.slope
                ));
            }
        }
        self.degraded = 0;
        self.initialized = true;
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        if !self.initialized {
            return Err(StageError::Internal("stage not initialized".into()));
        }
        let mut output = StageOutput::default();
        if self.amplitude.is_none() && self.sidescan.is_none() {
            return Ok(output);
        }
        let geometry = Geometry {
            ping: &*ping,
            profile: SwathProfile::from_ping(ping, SMOOTH_WIDTH),
        };

        let mut degraded = 0;
        let mut amplitude = Vec::new();
        if let Some(corrector) = &self.amplitude {
            let (table, reference) = corrector.table(ping);
            for (_, beam) in ping.good_beams() {
                let (angle, flat) = corrector.angle(&geometry, beam.acrosstrack, beam.alongtrack);
                degraded += usize::from(flat);
                amplitude.push(table.correct(angle, beam.amplitude, corrector.apply, reference));
            }
        }
        let mut sidescan = Vec::new();
        if let Some(corrector) = &self.sidescan {
            let (table, reference) = corrector.table(ping);
            for pixel in &ping.pixels {
                sidescan.push(pixel.intensity.map(|value| {
                    let (angle, flat) =
                        corrector.angle(&geometry, pixel.acrosstrack, pixel.alongtrack);
                    degraded += usize::from(flat);
                    table.correct(angle, value, corrector.apply, reference)
                }));
            }
        }

        if self.amplitude.is_some() {
            let beams = ping.beams.iter_mut().filter(|beam| beam.flag.is_ok());
            for (beam, value) in beams.zip(amplitude) {
                beam.amplitude = value;
                output.beams_changed += 1;
            }
        }
        if self.sidescan.is_some() {
            for (pixel, value) in ping.pixels.iter_mut().zip(sidescan) {
                pixel.intensity = value;
            }
        }
        if degraded > 0 {
            output
                .notes
                .push(format!("{} samples corrected against a flat bottom", degraded));
        }
        self.degraded += degraded;
        Ok(output)
    }

    fn cleanup(&mut self) {
        if self.degraded > 0 {
            self.logger.warn(&format!(
                "{} samples fell back to flat-bottom geometry",
                self.degraded
            ));
        }
        self.amplitude = None;
        self.sidescan = None;
        self.initialized = false;
    }
}
