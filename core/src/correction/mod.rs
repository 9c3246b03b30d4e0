//! Grazing-angle backscatter correction: time-varying tables, seafloor
//! geometry from the swath or from a topography grid, and the grid cache.

pub mod cache;
pub mod grid;
pub mod slope;
pub mod table;

pub use cache::GridCache;
pub use grid::{Footprint, GridHeader, TopoGrid};
pub use slope::{grazing_angle, SwathProfile, DEFAULT_ALTITUDE, SMOOTH_WIDTH};
pub use table::{CorrectionSeries, CorrectionTable};
