pub use crate::config::ProcessConfig;
pub use crate::ping::{Beam, BeamFlag, Limits, Ping, Pixel, Platform, Record};

/// Summary returned by a stage for one ping.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub beams_changed: usize,
    pub beams_nulled: usize,
    pub notes: Vec<String>,
}

impl StageOutput {
    pub fn merge(&mut self, other: StageOutput) {
        self.beams_changed += other.beams_changed;
        self.beams_nulled += other.beams_nulled;
        self.notes.extend(other.notes);
    }
}

/// Common error type for stage loading and execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("internal failure: {0}")]
    Internal(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Data-quality problems drop the ping; everything else ends the file.
    pub fn rejects_ping(&self) -> bool {
        matches!(
            self,
            StageError::InvalidInput(_) | StageError::CapacityExceeded(_)
        )
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the ordered per-ping transforms.
pub trait ProcessingStage {
    fn name(&self) -> &'static str;
    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()>;
    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput>;
    fn cleanup(&mut self);
}
