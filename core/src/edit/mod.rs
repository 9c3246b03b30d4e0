//! Persistent beam-edit replay and the reverse (undo) trail.

pub mod esf;
pub mod tracker;

pub use esf::{EditAction, EditFile, EditFileWriter, EsfHeader, EsfMode, RawEdit};
pub use tracker::{reverse_edits, EditSummary, EditTracker, MultiplicityCounter, UseState};
