use super::{
    BathymetryStage, BracketStage, CorrectionStage, CutStage, EditStage, MergeStage,
    SidescanStage,
};
use crate::correction::TopoGrid;
use crate::edit::{EditSummary, MultiplicityCounter};
use crate::ping::{Limits, Ping};
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::telemetry::log::LogManager;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Ordered stage sequence applied to every ping of one file.
pub struct Pipeline {
    merge: MergeStage,
    bathymetry: BathymetryStage,
    edit: EditStage,
    bathymetry_cuts: CutStage,
    sidescan: SidescanStage,
    backscatter_cuts: CutStage,
    correction: CorrectionStage,
    bracket: BracketStage,
    limits: Limits,
    multiplicity: MultiplicityCounter,
    logger: LogManager,
}

impl Pipeline {
    pub fn new(grids: HashMap<PathBuf, Arc<TopoGrid>>) -> Self {
        Self {
            merge: MergeStage::new(),
            bathymetry: BathymetryStage::new(),
            edit: EditStage::new(),
            bathymetry_cuts: CutStage::bathymetry(),
            sidescan: SidescanStage::new(),
            backscatter_cuts: CutStage::backscatter(),
            correction: CorrectionStage::new(grids),
            bracket: BracketStage::new(),
            limits: Limits::default(),
            multiplicity: MultiplicityCounter::default(),
            logger: LogManager::new("pipeline"),
        }
    }

    fn stages_mut(&mut self) -> [&mut dyn ProcessingStage; 8] {
        [
            &mut self.merge,
            &mut self.bathymetry,
            &mut self.edit,
            &mut self.bathymetry_cuts,
            &mut self.sidescan,
            &mut self.backscatter_cuts,
            &mut self.correction,
            &mut self.bracket,
        ]
    }

    /// Loads every auxiliary input; any failure here is fatal for the file.
    pub fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        self.limits = config.limits;
        self.multiplicity = MultiplicityCounter::default();
        for stage in self.stages_mut() {
            let name = stage.name();
            stage.initialize(config).map_err(|err| match err {
                StageError::Configuration(message) => {
                    StageError::Configuration(format!("{} stage: {}", name, message))
                }
                other => other,
            })?;
        }
        self.logger.record("stages initialized");
        Ok(())
    }

    /// Runs the full sequence on one ping. Errors for which
    /// [`StageError::rejects_ping`] holds leave the file processable.
    pub fn process(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        if ping.beams.len() > self.limits.max_beams {
            return Err(StageError::CapacityExceeded(format!(
                "{} beams, limit {}",
                ping.beams.len(),
                self.limits.max_beams
            )));
        }
        if ping.pixels.len() > self.limits.max_pixels {
            return Err(StageError::CapacityExceeded(format!(
                "{} pixels, limit {}",
                ping.pixels.len(),
                self.limits.max_pixels
            )));
        }
        let multiplicity = self.multiplicity.next(ping.time);
        ping.begin_processing(multiplicity);

        let mut output = StageOutput::default();
        for stage in self.stages_mut() {
            output.merge(stage.execute(ping)?);
        }
        Ok(output)
    }

    pub fn edit_summary(&self) -> Option<EditSummary> {
        self.edit.summary()
    }

    pub fn flat_bottom_samples(&self) -> usize {
        self.correction.degraded()
    }

    pub fn cleanup(&mut self) {
        for stage in self.stages_mut() {
            stage.cleanup();
        }
    }
}
