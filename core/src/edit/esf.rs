//! Binary edit-save files.
//!
//! Layout: an optional 1024-byte zero-padded text header starting with
//! `ESFVERSION0n`, then big-endian 16-byte records of
//! `(time: f64, beam: i32, action: i32)`. Files without the header are
//! version 1.

use crate::ping::BeamFlag;
use crate::prelude::{StageError, StageResult};
use crate::telemetry::identity::Identity;
use binrw::{binrw, BinRead, BinWrite};
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

pub const HEADER_SIZE: usize = 1024;
pub const RECORD_SIZE: usize = 16;
/// Beam field stride for pings sharing one timestamp.
pub const MULTIPLICITY_FACTOR: i32 = 1_000_000;
pub const MAX_TIME_DIFF: f64 = 0.00011;
/// Version 1 files carry timestamps truncated to the millisecond.
pub const MAX_TIME_DIFF_V1: f64 = 0.0011;
const MAGIC: &str = "ESFVERSION0";
const WRITE_VERSION: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Flag,
    Unflag,
    Zero,
    Filter,
    Sonar,
}

impl EditAction {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(EditAction::Flag),
            2 => Some(EditAction::Unflag),
            3 => Some(EditAction::Zero),
            4 => Some(EditAction::Filter),
            5 => Some(EditAction::Sonar),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            EditAction::Flag => 1,
            EditAction::Unflag => 2,
            EditAction::Zero => 3,
            EditAction::Filter => 4,
            EditAction::Sonar => 5,
        }
    }

    /// Flag a beam carries after this action.
    pub fn resulting_flag(self) -> BeamFlag {
        match self {
            EditAction::Flag => BeamFlag::Manual,
            EditAction::Unflag => BeamFlag::Ok,
            EditAction::Zero => BeamFlag::Null,
            EditAction::Filter => BeamFlag::Filter,
            EditAction::Sonar => BeamFlag::Sonar,
        }
    }

    /// Action that puts a beam back to `original`.
    pub fn restoring(original: BeamFlag) -> Self {
        match original {
            BeamFlag::Ok => EditAction::Unflag,
            BeamFlag::Null => EditAction::Zero,
            BeamFlag::Manual => EditAction::Flag,
            BeamFlag::Filter => EditAction::Filter,
            BeamFlag::Sonar => EditAction::Sonar,
        }
    }
}

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEdit {
    pub time: f64,
    pub beam: i32,
    pub action: i32,
}

impl RawEdit {
    pub fn new(time: f64, beam: usize, multiplicity: u32, action: EditAction) -> Self {
        Self {
            time,
            beam: beam as i32 + multiplicity as i32 * MULTIPLICITY_FACTOR,
            action: action.code(),
        }
    }
}

/// How beams without an edit are treated on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EsfMode {
    #[default]
    Explicit,
    ImplicitNull,
    ImplicitGood,
}

impl EsfMode {
    fn from_code(code: i32) -> Self {
        match code {
            1 => EsfMode::ImplicitNull,
            2 => EsfMode::ImplicitGood,
            _ => EsfMode::Explicit,
        }
    }

    fn code(self) -> i32 {
        match self {
            EsfMode::Explicit => 0,
            EsfMode::ImplicitNull => 1,
            EsfMode::ImplicitGood => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EsfHeader {
    pub version: u8,
    pub mode: EsfMode,
    pub tool_version: String,
    pub program: String,
    pub user: String,
    pub host: String,
    pub date: String,
}

impl EsfHeader {
    pub fn new(mode: EsfMode, identity: &Identity) -> Self {
        Self {
            version: WRITE_VERSION,
            mode,
            tool_version: identity.version.clone(),
            program: identity.program.clone(),
            user: identity.user.clone(),
            host: identity.host.clone(),
            date: identity.timestamp(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let text = format!(
            "{}{}\nESF Mode: {}\nTool Version {}\nProgram: {}\nUser: {}\nCPU: {}\nDate: {}\n",
            MAGIC,
            self.version,
            self.mode.code(),
            self.tool_version,
            self.program,
            self.user,
            self.host,
            self.date
        );
        let mut bytes = text.into_bytes();
        bytes.resize(HEADER_SIZE, 0);
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE || !bytes.starts_with(MAGIC.as_bytes()) {
            return None;
        }
        let end = bytes[..HEADER_SIZE]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(HEADER_SIZE);
        let text = String::from_utf8_lossy(&bytes[..end]);
        let mut header = EsfHeader {
            version: bytes[MAGIC.len()].wrapping_sub(b'0'),
            mode: EsfMode::Explicit,
            tool_version: String::new(),
            program: String::new(),
            user: String::new(),
            host: String::new(),
            date: String::new(),
        };
        for line in text.lines().skip(1) {
            if let Some(mode) = line.strip_prefix("ESF Mode:") {
                header.mode = EsfMode::from_code(mode.trim().parse().unwrap_or(0));
            } else if let Some(v) = line.strip_prefix("Tool Version") {
                header.tool_version = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("Program:") {
                header.program = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("User:") {
                header.user = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("CPU:") {
                header.host = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("Date:") {
                header.date = v.trim().to_string();
            }
        }
        Some(header)
    }
}

/// A decoded edit-save file with records stable-sorted by time.
#[derive(Debug, Clone)]
pub struct EditFile {
    pub version: u8,
    pub mode: EsfMode,
    pub header: Option<EsfHeader>,
    pub records: Vec<RawEdit>,
}

impl EditFile {
    pub fn load<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            StageError::Configuration(format!("unable to read edit file {}: {}", path.display(), err))
        })?;
        Self::decode(&bytes)
            .map_err(|err| StageError::Configuration(format!("{}: {}", path.display(), err)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, binrw::Error> {
        let header = EsfHeader::parse(bytes);
        let (version, mode, body) = match &header {
            Some(h) => (h.version, h.mode, &bytes[HEADER_SIZE..]),
            None => (1, EsfMode::Explicit, bytes),
        };
        let whole = body.len() / RECORD_SIZE * RECORD_SIZE;
        if whole != body.len() {
            warn!(
                "edit file has {} trailing bytes, ignored",
                body.len() - whole
            );
        }
        let mut reader = Cursor::new(&body[..whole]);
        let mut records = Vec::with_capacity(whole / RECORD_SIZE);
        for _ in 0..whole / RECORD_SIZE {
            records.push(RawEdit::read(&mut reader)?);
        }
        records.sort_by(|a, b| a.time.total_cmp(&b.time));
        debug!("decoded {} edits, version {}", records.len(), version);
        Ok(Self {
            version,
            mode,
            header,
            records,
        })
    }

    pub fn max_time_diff(&self) -> f64 {
        if self.version == 1 {
            MAX_TIME_DIFF_V1
        } else {
            MAX_TIME_DIFF
        }
    }
}

/// Streams records to a new edit-save file.
pub struct EditFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    count: usize,
}

impl EditFileWriter {
    pub fn create<P: AsRef<Path>>(path: P, header: &EsfHeader) -> StageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&header.to_bytes())?;
        Ok(Self {
            path,
            writer,
            count: 0,
        })
    }

    pub fn push(&mut self, record: &RawEdit) -> StageResult<()> {
        let mut buffer = Cursor::new(Vec::with_capacity(RECORD_SIZE));
        record
            .write(&mut buffer)
            .map_err(|err| StageError::Internal(format!("encoding edit record: {}", err)))?;
        self.writer.write_all(buffer.get_ref())?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(mut self) -> StageResult<usize> {
        self.writer.flush()?;
        debug!("wrote {} edits to {}", self.count, self.path.display());
        Ok(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn identity() -> Identity {
        Identity {
            program: "swathproc".into(),
            version: "0.1.0".into(),
            user: "surveyor".into(),
            host: "deck".into(),
        }
    }

    #[test]
    fn header_is_padded_and_parses_back() {
        let header = EsfHeader::new(EsfMode::ImplicitGood, &identity());
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert!(bytes.starts_with(b"ESFVERSION03\nESF Mode: 2\n"));
        let parsed = EsfHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.mode, EsfMode::ImplicitGood);
        assert_eq!(parsed.user, "surveyor");
    }

    #[test]
    fn written_file_decodes_sorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("line.esf");
        let mut writer = EditFileWriter::create(&path, &EsfHeader::new(EsfMode::Explicit, &identity())).unwrap();
        writer.push(&RawEdit::new(20.0, 3, 0, EditAction::Flag)).unwrap();
        writer.push(&RawEdit::new(10.0, 7, 1, EditAction::Unflag)).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * RECORD_SIZE);
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 8], &20.0f64.to_be_bytes());

        let file = EditFile::load(&path).unwrap();
        assert_eq!(file.version, 3);
        assert_eq!(file.records[0].time, 10.0);
        assert_eq!(file.records[0].beam, 1_000_007);
        assert_eq!(file.records[1].action, 1);
    }

    #[test]
    fn headerless_file_is_version_one() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5.0f64.to_be_bytes());
        bytes.extend_from_slice(&2i32.to_be_bytes());
        bytes.extend_from_slice(&3i32.to_be_bytes());
        let file = EditFile::decode(&bytes).unwrap();
        assert_eq!(file.version, 1);
        assert_eq!(file.max_time_diff(), MAX_TIME_DIFF_V1);
        assert_eq!(EditAction::from_code(file.records[0].action), Some(EditAction::Zero));
    }

    #[test]
    fn restoring_action_round_trips_flags() {
        for flag in [
            BeamFlag::Ok,
            BeamFlag::Null,
            BeamFlag::Manual,
            BeamFlag::Filter,
            BeamFlag::Sonar,
        ] {
            assert_eq!(EditAction::restoring(flag).resulting_flag(), flag);
        }
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let err = EditFile::load(dir.path().join("absent.esf")).unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
    }
}
