//! Sound-speed profiles and ray tracing through a layered water column.

pub mod svp;
pub mod tracer;

pub use svp::{SoundSpeedProfile, MAX_PROFILE_DEPTH, REFERENCE_VELOCITY};
pub use tracer::{compute_depth, RayResult, RayStatus};
