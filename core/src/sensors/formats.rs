use crate::interp::{apply_lonflip, TimeSeries};
use crate::prelude::{StageError, StageResult};
use log::{debug, warn};
use std::fs;
use std::path::Path;
use time::{Date, Duration, Month, PrimitiveDateTime, Time};

/// Where the timestamp sits in a text row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeLayout {
    /// Epoch seconds in column 0.
    Epoch,
    /// `yr mon day hr min sec` in columns 0..6.
    Calendar,
    /// Calendar fields followed by epoch seconds in column 6.
    CalendarEpoch,
}

impl TimeLayout {
    fn first_value(self) -> usize {
        match self {
            TimeLayout::Epoch => 1,
            TimeLayout::Calendar => 6,
            TimeLayout::CalendarEpoch => 7,
        }
    }

    fn time(self, row: &[f64]) -> Option<f64> {
        match self {
            TimeLayout::Epoch => row.first().copied(),
            TimeLayout::CalendarEpoch => row.get(6).copied(),
            TimeLayout::Calendar => calendar_seconds(row),
        }
    }
}

/// Epoch seconds for `yr mon day hr min sec` fields.
pub fn epoch_seconds(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: f64) -> Option<f64> {
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, 0).ok()?;
    let stamp = PrimitiveDateTime::new(date, time).assume_utc();
    Some(stamp.unix_timestamp() as f64 + second)
}

/// Inverse of [`epoch_seconds`]: calendar fields and fractional seconds.
pub fn calendar_fields(epoch: f64) -> Option<(i32, u8, u8, u8, u8, f64)> {
    let whole = epoch.floor();
    let stamp = time::OffsetDateTime::UNIX_EPOCH.checked_add(Duration::seconds(whole as i64))?;
    Some((
        stamp.year(),
        stamp.month() as u8,
        stamp.day(),
        stamp.hour(),
        stamp.minute(),
        stamp.second() as f64 + (epoch - whole),
    ))
}

fn calendar_seconds(row: &[f64]) -> Option<f64> {
    if row.len() < 6 {
        return None;
    }
    epoch_seconds(
        row[0] as i32,
        row[1] as u8,
        row[2] as u8,
        row[3] as u8,
        row[4] as u8,
        row[5],
    )
}

/// Reads whitespace-separated numeric rows, skipping blanks and `#` comments.
/// A row stops at its first non-numeric token.
fn read_rows(path: &Path, label: &str) -> StageResult<Vec<Vec<f64>>> {
    let contents = fs::read_to_string(path).map_err(|err| {
        StageError::Configuration(format!(
            "unable to open {} file {}: {}",
            label,
            path.display(),
            err
        ))
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split_whitespace()
                .map_while(|token| token.parse::<f64>().ok())
                .collect::<Vec<f64>>()
        })
        .filter(|row| !row.is_empty())
        .collect())
}

/// Time-stamped rows with strictly increasing time.
struct TimedRows {
    times: Vec<f64>,
    rows: Vec<Vec<f64>>,
}

impl TimedRows {
    fn parse(path: &Path, label: &str, layout: TimeLayout, min_values: usize) -> StageResult<Self> {
        let mut times = Vec::new();
        let mut rows = Vec::new();
        let mut dropped = 0usize;
        let first = layout.first_value();
        for row in read_rows(path, label)? {
            if row.len() < first + min_values {
                dropped += 1;
                continue;
            }
            let Some(t) = layout.time(&row) else {
                dropped += 1;
                continue;
            };
            if times.last().map_or(false, |&last| t <= last) {
                dropped += 1;
                continue;
            }
            times.push(t);
            rows.push(row[first..].to_vec());
        }
        if dropped > 0 {
            warn!(
                "{}: {} {} records dropped (short, unparseable or time not increasing)",
                path.display(),
                dropped,
                label
            );
        }
        debug!("{}: {} {} records", path.display(), times.len(), label);
        Ok(Self { times, rows })
    }

    /// Smallest number of value columns across every row.
    fn min_width(&self) -> usize {
        self.rows.iter().map(Vec::len).min().unwrap_or(0)
    }

    fn column(&self, label: &str, index: usize) -> StageResult<TimeSeries> {
        let values = self.rows.iter().map(|row| row[index]).collect();
        TimeSeries::new(label, self.times.clone(), values)
    }

    fn optional_column(&self, label: &str, index: usize) -> StageResult<Option<TimeSeries>> {
        if index < self.min_width() {
            self.column(label, index).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Navigation loaded from a nav file.
#[derive(Debug, Clone)]
pub struct NavSeries {
    pub longitude: TimeSeries,
    pub latitude: TimeSeries,
    pub heading: Option<TimeSeries>,
    pub speed: Option<TimeSeries>,
    pub draft: Option<TimeSeries>,
    pub roll: Option<TimeSeries>,
    pub pitch: Option<TimeSeries>,
    pub heave: Option<TimeSeries>,
}

impl NavSeries {
    /// Formats: 1 `time lon lat`, 2 `yr mon day hr min sec lon lat`,
    /// 9 `yr mon day hr min sec time lon lat [heading speed draft roll pitch heave]`.
    pub fn load<P: AsRef<Path>>(path: P, format: u8, lonflip: i32, time_shift: f64) -> StageResult<Self> {
        let path = path.as_ref();
        let layout = match format {
            1 => TimeLayout::Epoch,
            2 => TimeLayout::Calendar,
            9 => TimeLayout::CalendarEpoch,
            other => {
                return Err(StageError::Configuration(format!(
                    "unsupported navigation format {}",
                    other
                )))
            }
        };
        let mut rows = TimedRows::parse(path, "navigation", layout, 2)?;
        for row in &mut rows.rows {
            row[0] = apply_lonflip(row[0], lonflip);
        }
        let mut nav = Self {
            longitude: rows.column("navigation longitude", 0)?,
            latitude: rows.column("navigation latitude", 1)?,
            heading: rows.optional_column("navigation heading", 2)?,
            speed: rows.optional_column("navigation speed", 3)?,
            draft: rows.optional_column("navigation draft", 4)?,
            roll: rows.optional_column("navigation roll", 5)?,
            pitch: rows.optional_column("navigation pitch", 6)?,
            heave: rows.optional_column("navigation heave", 7)?,
        };
        if time_shift != 0.0 {
            for series in nav.series_mut() {
                series.shift_times(time_shift);
            }
        }
        Ok(nav)
    }

    fn series_mut(&mut self) -> impl Iterator<Item = &mut TimeSeries> {
        [
            Some(&mut self.longitude),
            Some(&mut self.latitude),
            self.heading.as_mut(),
            self.speed.as_mut(),
            self.draft.as_mut(),
            self.roll.as_mut(),
            self.pitch.as_mut(),
            self.heave.as_mut(),
        ]
        .into_iter()
        .flatten()
    }

    pub fn with_spline(mut self) -> Self {
        self.longitude = self.longitude.with_spline();
        self.latitude = self.latitude.with_spline();
        self
    }

    pub fn has_attitude(&self) -> bool {
        self.roll.is_some() && self.pitch.is_some() && self.heave.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct AttitudeSeries {
    pub roll: TimeSeries,
    pub pitch: TimeSeries,
    pub heave: TimeSeries,
}

impl AttitudeSeries {
    /// Format 1 `time roll pitch heave`, format 2 `yr mon day hr min sec roll pitch heave`.
    pub fn load<P: AsRef<Path>>(path: P, format: u8) -> StageResult<Self> {
        let rows = TimedRows::parse(path.as_ref(), "attitude", scalar_layout(format)?, 3)?;
        Ok(Self {
            roll: rows.column("attitude roll", 0)?,
            pitch: rows.column("attitude pitch", 1)?,
            heave: rows.column("attitude heave", 2)?,
        })
    }
}

/// One value per record: sensordepth or tide.
pub fn load_scalar<P: AsRef<Path>>(path: P, format: u8, label: &str) -> StageResult<TimeSeries> {
    let rows = TimedRows::parse(path.as_ref(), label, scalar_layout(format)?, 1)?;
    rows.column(label, 0)
}

fn scalar_layout(format: u8) -> StageResult<TimeLayout> {
    match format {
        1 => Ok(TimeLayout::Epoch),
        2 => Ok(TimeLayout::Calendar),
        other => Err(StageError::Configuration(format!(
            "unsupported time series format {}",
            other
        ))),
    }
}

/// Adjusted navigation from a navigation inversion.
#[derive(Debug, Clone)]
pub struct AdjustedNav {
    pub longitude: TimeSeries,
    pub latitude: TimeSeries,
    /// Vertical correction added to the draft.
    pub depth: Option<TimeSeries>,
}

impl AdjustedNav {
    /// `yr mon day hr min sec time lon lat [heading speed draft roll pitch heave z]`.
    pub fn load<P: AsRef<Path>>(path: P, lonflip: i32, with_depth: bool) -> StageResult<Self> {
        let path = path.as_ref();
        let mut rows = TimedRows::parse(path, "adjusted navigation", TimeLayout::CalendarEpoch, 2)?;
        for row in &mut rows.rows {
            row[0] = apply_lonflip(row[0], lonflip);
        }
        let depth = if with_depth {
            let depth = rows.optional_column("adjusted navigation depth", 8)?;
            if depth.is_none() {
                return Err(StageError::Configuration(format!(
                    "{}: depth adjustment requested but the z column is missing",
                    path.display()
                )));
            }
            depth
        } else {
            None
        };
        Ok(Self {
            longitude: rows.column("adjusted longitude", 0)?,
            latitude: rows.column("adjusted latitude", 1)?,
            depth,
        })
    }

    pub fn with_spline(mut self) -> Self {
        self.longitude = self.longitude.with_spline();
        self.latitude = self.latitude.with_spline();
        self
    }
}
