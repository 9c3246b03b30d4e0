pub mod geodesy;
pub mod stats;

pub use geodesy::{coor_scale, rollpitch_to_takeoff, takeoff_to_rollpitch, xyz_to_takeoff};
pub use stats::StatsHelper;
