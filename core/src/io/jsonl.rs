use super::{PingSink, PingSource};
use crate::ping::Record;
use crate::prelude::{StageError, StageResult};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Newline-delimited JSON records, one [`Record`] per line.
pub struct JsonLinesSource {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
    buffer: String,
}

impl JsonLinesSource {
    pub fn open<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| {
            StageError::Configuration(format!("unable to open {}: {}", path.display(), err))
        })?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            line: 0,
            buffer: String::new(),
        })
    }
}

impl PingSource for JsonLinesSource {
    fn read_record(&mut self) -> StageResult<Option<Record>> {
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let text = self.buffer.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text).map(Some).map_err(|err| {
                StageError::InvalidInput(format!(
                    "{} line {}: {}",
                    self.path.display(),
                    self.line,
                    err
                ))
            });
        }
    }
}

pub struct JsonLinesSink {
    writer: BufWriter<File>,
    records: usize,
}

impl JsonLinesSink {
    pub fn create<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            records: 0,
        })
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

impl PingSink for JsonLinesSink {
    fn write_record(&mut self, record: &Record) -> StageResult<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|err| StageError::Internal(format!("encoding record: {}", err)))?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    fn finish(&mut self) -> StageResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
