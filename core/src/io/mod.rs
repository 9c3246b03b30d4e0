//! Ping sources and sinks plus the per-file side outputs.

pub mod jsonl;
pub mod side;

pub use jsonl::{JsonLinesSink, JsonLinesSource};
pub use side::{BoundsAccumulator, FbtWriter, FnvWriter};

use crate::ping::{Platform, Ping, Record};
use crate::prelude::StageResult;

/// Yields records from a swath file in file order.
pub trait PingSource {
    /// `Ok(None)` at end of file. An `InvalidInput` error skips one record.
    fn read_record(&mut self) -> StageResult<Option<Record>>;
}

/// Receives processed records.
pub trait PingSink {
    fn write_record(&mut self, record: &Record) -> StageResult<()>;

    /// Stores processed navigation into an outgoing ping. Formats that keep
    /// navigation in separate records override this.
    fn insert_navigation(&mut self, ping: &mut Ping, platform: &Platform) -> StageResult<()> {
        ping.platform = *platform;
        Ok(())
    }

    fn finish(&mut self) -> StageResult<()>;
}
