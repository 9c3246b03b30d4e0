//! Processing core for swath sonar post-processing.
//!
//! Pings flow through an ordered set of stages: auxiliary sensor merge,
//! bathymetry recalculation by raytracing, edit replay, data cuts and
//! grazing-angle backscatter correction. The driver crate owns file
//! scheduling, locking and the grid cache.

pub mod config;
pub mod correction;
pub mod edit;
pub mod interp;
pub mod io;
pub mod math;
pub mod ping;
pub mod prelude;
pub mod processing;
pub mod raytrace;
pub mod sensors;
pub mod telemetry;

pub use prelude::{ProcessingStage, StageError, StageOutput, StageResult};
