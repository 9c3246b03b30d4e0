use crate::edit::{EditSummary, EditTracker};
use crate::ping::Ping;
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::telemetry::log::LogManager;

/// Replays the persisted edit list against each ping.
pub struct EditStage {
    tracker: Option<EditTracker>,
    initialized: bool,
    logger: LogManager,
}

impl EditStage {
    pub fn new() -> Self {
        Self {
            tracker: None,
            initialized: false,
            logger: LogManager::new("edit"),
        }
    }

    pub fn summary(&self) -> Option<EditSummary> {
        self.tracker.as_ref().map(EditTracker::summary)
    }
}

impl Default for EditStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for EditStage {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        self.tracker = if config.edit.enabled {
            let path = config.edit.file.as_ref().ok_or_else(|| {
                StageError::Configuration("editing enabled without an edit file".into())
            })?;
            let tracker = EditTracker::load(path)?;
            self.logger
                .record(&format!("{} edits loaded from {}", tracker.len(), path.display()));
            Some(tracker)
        } else {
            None
        };
        self.initialized = true;
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        if !self.initialized {
            return Err(StageError::Internal("stage not initialized".into()));
        }
        let beams_changed = self
            .tracker
            .as_mut()
            .map_or(0, |tracker| tracker.apply(ping));
        Ok(StageOutput {
            beams_changed,
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        if let Some(summary) = self.summary() {
            self.logger.record(&format!(
                "edits used {} unused {} duplicate {} tied to null {}",
                summary.used, summary.unused, summary.duplicate, summary.tied_to_null
            ));
        }
        self.tracker = None;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{EditAction, EditFileWriter, EsfHeader, EsfMode, RawEdit};
    use crate::ping::{Beam, BeamFlag};
    use crate::telemetry::Identity;
    use tempfile::tempdir;

    #[test]
    fn stage_applies_edits_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("line.esf");
        let header = EsfHeader::new(EsfMode::Explicit, &Identity::current("test", "0.1"));
        let mut writer = EditFileWriter::create(&path, &header).unwrap();
        writer.push(&RawEdit::new(20.0, 1, 0, EditAction::Flag)).unwrap();
        writer.finish().unwrap();

        let mut config = ProcessConfig::default();
        config.edit.enabled = true;
        config.edit.file = Some(path);
        let mut stage = EditStage::new();
        stage.initialize(&config).unwrap();

        let mut ping = Ping {
            time: 20.0,
            beams: vec![Beam::sounding(10.0, 0.0, 0.0); 3],
            ..Default::default()
        };
        ping.begin_processing(0);
        let output = stage.execute(&mut ping).unwrap();
        assert_eq!(output.beams_changed, 1);
        assert_eq!(ping.beams[1].flag, BeamFlag::Manual);
        assert_eq!(stage.summary().unwrap().used, 1);
        stage.cleanup();
        assert!(stage.summary().is_none());
    }

    #[test]
    fn missing_edit_file_is_fatal() {
        let mut config = ProcessConfig::default();
        config.edit.enabled = true;
        config.edit.file = Some("/nonexistent/line.esf".into());
        let err = EditStage::new().initialize(&config).unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
    }
}
