use crate::config::{ApplyMode, Symmetry};
use crate::interp::linear_lookup;
use crate::prelude::{StageError, StageResult};
use log::debug;
use std::fs;
use std::path::Path;

/// Amplitude versus grazing angle at one capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionTable {
    pub time: f64,
    pub angles: Vec<f64>,
    pub amplitude: Vec<f64>,
    pub sigma: Vec<f64>,
}

impl CorrectionTable {
    /// Averages each entry with its mirror across nadir. A zero entry is
    /// missing and takes its partner's value; sigma keeps the larger.
    pub fn force_symmetry(&mut self) {
        let n = self.amplitude.len();
        for i in 0..n / 2 {
            let j = n - 1 - i;
            let (a, b) = (self.amplitude[i], self.amplitude[j]);
            let value = match (a != 0.0, b != 0.0) {
                (true, true) => 0.5 * (a + b),
                (true, false) => a,
                _ => b,
            };
            self.amplitude[i] = value;
            self.amplitude[j] = value;
            let sigma = self.sigma[i].max(self.sigma[j]);
            self.sigma[i] = sigma;
            self.sigma[j] = sigma;
        }
    }

    /// Replaces zero amplitudes: nearest valid value outside the valid span,
    /// linear in angle between valid neighbours inside it.
    pub fn fill_gaps(&mut self) {
        let valid: Vec<usize> = (0..self.amplitude.len())
            .filter(|&i| self.amplitude[i] != 0.0)
            .collect();
        let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
            return;
        };
        for i in 0..self.amplitude.len() {
            if self.amplitude[i] != 0.0 {
                continue;
            }
            if i < first {
                self.amplitude[i] = self.amplitude[first];
                self.sigma[i] = self.sigma[first];
            } else if i > last {
                self.amplitude[i] = self.amplitude[last];
                self.sigma[i] = self.sigma[last];
            } else {
                let k = valid.partition_point(|&v| v < i);
                let (lo, hi) = (valid[k - 1], valid[k]);
                let f = (self.angles[i] - self.angles[lo]) / (self.angles[hi] - self.angles[lo]);
                self.amplitude[i] = self.amplitude[lo] + f * (self.amplitude[hi] - self.amplitude[lo]);
                self.sigma[i] = self.sigma[lo] + f * (self.sigma[hi] - self.sigma[lo]);
            }
        }
    }

    /// Correction value at `angle`, clamped to the table's angular span.
    pub fn lookup(&self, angle: f64) -> f64 {
        linear_lookup(&self.angles, &self.amplitude, angle).unwrap_or(0.0)
    }

    /// Mean of the port and starboard values at `reference_angle`.
    pub fn reference(&self, reference_angle: f64) -> f64 {
        0.5 * (self.lookup(-reference_angle.abs()) + self.lookup(reference_angle.abs()))
    }

    /// Normalizes `raw` observed at `angle` back to the reference level.
    pub fn correct(&self, angle: f64, raw: f64, apply: ApplyMode, reference: f64) -> f64 {
        let value = self.lookup(angle);
        match apply {
            ApplyMode::Subtract => raw - value + reference,
            ApplyMode::Divide if value != 0.0 => raw / value * reference,
            ApplyMode::Divide => raw,
        }
    }
}

/// Time-ordered correction tables sharing one angle grid.
#[derive(Debug, Clone)]
pub struct CorrectionSeries {
    tables: Vec<CorrectionTable>,
}

impl CorrectionSeries {
    pub fn new(mut tables: Vec<CorrectionTable>, symmetry: Symmetry) -> StageResult<Self> {
        let Some(first) = tables.first() else {
            return Err(StageError::Configuration(
                "correction table file holds no tables".into(),
            ));
        };
        let angles = first.angles.clone();
        for table in &tables {
            if table.angles != angles
                || table.amplitude.len() != angles.len()
                || table.sigma.len() != angles.len()
            {
                return Err(StageError::Configuration(format!(
                    "correction table at {:.3} does not match the {}-angle grid",
                    table.time,
                    angles.len()
                )));
            }
        }
        tables.sort_by(|a, b| a.time.total_cmp(&b.time));
        if symmetry == Symmetry::Symmetric {
            for table in &mut tables {
                table.force_symmetry();
            }
        }
        Ok(Self { tables })
    }

    /// Parses the text format written by the table builder:
    /// `# table:`, `# time: <date> <epoch>`, `# nangles:` headers then
    /// `angle amplitude sigma` rows.
    pub fn load<P: AsRef<Path>>(path: P, symmetry: Symmetry) -> StageResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            StageError::Configuration(format!(
                "unable to read correction tables {}: {}",
                path.display(),
                err
            ))
        })?;
        let bad = |line: &str| {
            StageError::Configuration(format!("{}: malformed line '{}'", path.display(), line))
        };

        let mut tables = Vec::new();
        let mut current: Option<CorrectionTable> = None;
        let mut expected = 0usize;
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(header) = line.strip_prefix('#') {
                let header = header.trim();
                if header.starts_with("table:") {
                    if let Some(table) = current.take() {
                        tables.push(table);
                    }
                    current = Some(CorrectionTable {
                        time: 0.0,
                        angles: Vec::new(),
                        amplitude: Vec::new(),
                        sigma: Vec::new(),
                    });
                } else if let Some(rest) = header.strip_prefix("time:") {
                    let epoch = rest
                        .split_whitespace()
                        .last()
                        .and_then(|token| token.parse::<f64>().ok())
                        .ok_or_else(|| bad(line))?;
                    if let Some(table) = current.as_mut() {
                        table.time = epoch;
                    }
                } else if let Some(rest) = header.strip_prefix("nangles:") {
                    expected = rest.trim().parse().map_err(|_| bad(line))?;
                }
                continue;
            }
            let table = current.as_mut().ok_or_else(|| bad(line))?;
            let fields: Vec<f64> = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<_, _>>()
                .map_err(|_| bad(line))?;
            if fields.len() < 3 {
                return Err(bad(line));
            }
            table.angles.push(fields[0]);
            table.amplitude.push(fields[1]);
            table.sigma.push(fields[2]);
        }
        if let Some(table) = current.take() {
            tables.push(table);
        }
        if let Some(table) = tables.iter().find(|t| expected > 0 && t.angles.len() != expected) {
            return Err(StageError::Configuration(format!(
                "{}: table at {:.3} has {} angles, header says {}",
                path.display(),
                table.time,
                table.angles.len(),
                expected
            )));
        }
        debug!("{}: {} correction tables", path.display(), tables.len());
        Self::new(tables, symmetry)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table in effect at `t`: clamped outside the series, blended between
    /// the two bracketing tables inside it.
    pub fn table_at(&self, t: f64) -> CorrectionTable {
        let n = self.tables.len();
        let mut table = if n == 1 || t <= self.tables[0].time {
            self.tables[0].clone()
        } else if t >= self.tables[n - 1].time {
            self.tables[n - 1].clone()
        } else {
            let k = self.tables.partition_point(|table| table.time <= t);
            let (before, after) = (&self.tables[k - 1], &self.tables[k]);
            let f = (t - before.time) / (after.time - before.time);
            let blend = |a: f64, b: f64| {
                let a = if a == 0.0 { b } else { a };
                let b = if b == 0.0 { a } else { b };
                a + f * (b - a)
            };
            CorrectionTable {
                time: t,
                angles: before.angles.clone(),
                amplitude: before
                    .amplitude
                    .iter()
                    .zip(&after.amplitude)
                    .map(|(&a, &b)| blend(a, b))
                    .collect(),
                sigma: before
                    .sigma
                    .iter()
                    .zip(&after.sigma)
                    .map(|(&a, &b)| blend(a, b))
                    .collect(),
            }
        };
        table.fill_gaps();
        table
    }

    pub fn correct(&self, t: f64, angle: f64, raw: f64, apply: ApplyMode, reference_angle: f64) -> f64 {
        let table = self.table_at(t);
        let reference = table.reference(reference_angle);
        table.correct(angle, raw, apply, reference)
    }
}
