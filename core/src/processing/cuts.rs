use crate::config::{CutKind, CutMode, DataCut};
use crate::ping::{BeamFlag, Ping};
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::telemetry::log::LogManager;

/// Applies the configured data cuts of the given kinds.
///
/// Number and distance cuts remove data inside `[min, max]`; a speed cut
/// removes the whole ping when the platform speed lies outside it.
pub struct CutStage {
    name: &'static str,
    kinds: &'static [CutKind],
    cuts: Option<Vec<DataCut>>,
    logger: LogManager,
}

impl CutStage {
    pub fn bathymetry() -> Self {
        Self::with_kinds("bathymetry_cuts", &[CutKind::Bathymetry])
    }

    pub fn backscatter() -> Self {
        Self::with_kinds("backscatter_cuts", &[CutKind::Amplitude, CutKind::Sidescan])
    }

    fn with_kinds(name: &'static str, kinds: &'static [CutKind]) -> Self {
        Self {
            name,
            kinds,
            cuts: None,
            logger: LogManager::new(name),
        }
    }
}

fn inside(cut: &DataCut, value: f64) -> bool {
    value >= cut.min && value <= cut.max
}

/// True when element `index` at `across` falls under the cut.
fn selects(cut: &DataCut, speed: f64, index: usize, across: f64) -> bool {
    match cut.mode {
        CutMode::Number => inside(cut, index as f64),
        CutMode::Distance => inside(cut, across),
        CutMode::Speed => !inside(cut, speed),
    }
}

fn apply_cut(cut: &DataCut, ping: &mut Ping) -> usize {
    let speed = ping.platform.speed;
    let mut changed = 0;
    match cut.kind {
        CutKind::Bathymetry => {
            for (index, beam) in ping.beams.iter_mut().enumerate() {
                if beam.flag.is_ok() && selects(cut, speed, index, beam.acrosstrack) {
                    beam.flag = BeamFlag::Manual;
                    changed += 1;
                }
            }
        }
        CutKind::Amplitude => {
            for (index, beam) in ping.beams.iter_mut().enumerate() {
                if beam.flag.is_null() || !selects(cut, speed, index, beam.acrosstrack) {
                    continue;
                }
                if cut.mode == CutMode::Speed {
                    if beam.amplitude != 0.0 {
                        beam.amplitude = 0.0;
                        changed += 1;
                    }
                } else if beam.flag.is_ok() {
                    beam.flag = BeamFlag::Manual;
                    changed += 1;
                }
            }
        }
        CutKind::Sidescan => {
            for (index, pixel) in ping.pixels.iter_mut().enumerate() {
                if pixel.intensity.is_some() && selects(cut, speed, index, pixel.acrosstrack) {
                    pixel.intensity = None;
                    changed += 1;
                }
            }
        }
    }
    changed
}

impl ProcessingStage for CutStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        let mut cuts = Vec::new();
        for cut in config.cuts.iter().filter(|cut| self.kinds.contains(&cut.kind)) {
            if cut.min > cut.max {
                return Err(StageError::Configuration(format!(
                    "{:?} cut has min {} above max {}",
                    cut.kind, cut.min, cut.max
                )));
            }
            cuts.push(cut.clone());
        }
        if !cuts.is_empty() {
            self.logger.record(&format!("{} cuts active", cuts.len()));
        }
        self.cuts = Some(cuts);
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        let cuts = self
            .cuts
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        let beams_changed = cuts.iter().map(|cut| apply_cut(cut, ping)).sum();
        Ok(StageOutput {
            beams_changed,
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        self.cuts = None;
    }
}
