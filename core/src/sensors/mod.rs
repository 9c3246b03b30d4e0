//! Auxiliary sensor series: navigation, attitude, sensor depth, tide and
//! adjusted navigation, plus the lever-arm heave model.

pub mod formats;
pub mod lever;

pub use formats::{load_scalar, AdjustedNav, AttitudeSeries, NavSeries};
pub use lever::lever_heave;
