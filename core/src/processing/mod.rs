//! Per-ping stages and the pipeline that chains them.

pub mod backscatter;
pub mod bathymetry;
pub mod buffer_pool;
pub mod cuts;
pub mod edit;
pub mod merge;
pub mod pipeline;
pub mod sidescan;

pub use backscatter::CorrectionStage;
pub use bathymetry::{effective_recalc, BathymetryStage, StaticTable};
pub use buffer_pool::BufferPool;
pub use cuts::CutStage;
pub use edit::EditStage;
pub use merge::MergeStage;
pub use pipeline::Pipeline;
pub use sidescan::{BracketStage, SidescanStage};
