//! Time-keyed interpolation shared by every merge.
//!
//! A [`TimeSeries`] is immutable once loaded. Each consumer keeps its own
//! [`Cursor`] so successive queries in time order only walk forward.

use crate::prelude::{StageError, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Linear,
    /// Natural cubic spline; falls back to linear when no spline was built.
    Spline,
    /// Linear across the antimeridian.
    Longitude,
    /// Shortest-path angle interpolation, result in [0, 360).
    Heading,
}

/// Segment position remembered between queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    index: usize,
}

impl Cursor {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    times: Vec<f64>,
    values: Vec<f64>,
    curvature: Option<Vec<f64>>,
}

impl TimeSeries {
    pub fn new(label: &str, times: Vec<f64>, values: Vec<f64>) -> StageResult<Self> {
        if times.len() != values.len() {
            return Err(StageError::Configuration(format!(
                "{} series has {} times but {} values",
                label,
                times.len(),
                values.len()
            )));
        }
        if times.len() < 2 {
            return Err(StageError::Configuration(format!(
                "{} series needs at least 2 samples, found {}",
                label,
                times.len()
            )));
        }
        if let Some(pos) = times.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(StageError::Configuration(format!(
                "{} series time not increasing at sample {}",
                label,
                pos + 1
            )));
        }
        Ok(Self {
            times,
            values,
            curvature: None,
        })
    }

    /// Precomputes second derivatives for [`Method::Spline`].
    pub fn with_spline(mut self) -> Self {
        self.curvature = Some(natural_spline(&self.times, &self.values));
        self
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn start(&self) -> f64 {
        self.times[0]
    }

    pub fn end(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start() && t <= self.end()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn shift_times(&mut self, offset: f64) {
        for t in &mut self.times {
            *t += offset;
        }
    }

    fn seek(&self, cursor: &mut Cursor, t: f64) -> usize {
        let last = self.times.len() - 2;
        if cursor.index > last || t < self.times[cursor.index] {
            cursor.index = self
                .times
                .partition_point(|&sample| sample <= t)
                .saturating_sub(1)
                .min(last);
        }
        while cursor.index < last && self.times[cursor.index + 1] <= t {
            cursor.index += 1;
        }
        cursor.index
    }

    /// Value at `t`, clamped to the end samples outside the series span.
    pub fn interp(&self, cursor: &mut Cursor, t: f64, method: Method) -> f64 {
        let n = self.times.len();
        let value = if t <= self.times[0] {
            self.values[0]
        } else if t >= self.times[n - 1] {
            self.values[n - 1]
        } else {
            let i = self.seek(cursor, t);
            let (t0, t1) = (self.times[i], self.times[i + 1]);
            let (v0, v1) = (self.values[i], self.values[i + 1]);
            let f = (t - t0) / (t1 - t0);
            match (method, &self.curvature) {
                (Method::Linear, _) | (Method::Spline, None) => v0 + f * (v1 - v0),
                (Method::Longitude, _) | (Method::Heading, _) => v0 + f * wrap_half_turn(v1 - v0),
                (Method::Spline, Some(y2)) => {
                    let h = t1 - t0;
                    let a = (t1 - t) / h;
                    let b = (t - t0) / h;
                    a * v0
                        + b * v1
                        + ((a * a * a - a) * y2[i] + (b * b * b - b) * y2[i + 1]) * h * h / 6.0
                }
            }
        };
        if method == Method::Heading {
            wrap_heading(value)
        } else {
            value
        }
    }
}

/// Natural cubic spline second derivatives (zero at both ends).
fn natural_spline(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut y2 = vec![0.0; n];
    let mut u = vec![0.0; n];
    for i in 1..n - 1 {
        let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
        let p = sig * y2[i - 1] + 2.0;
        y2[i] = (sig - 1.0) / p;
        let slope = (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
        u[i] = (6.0 * slope / (x[i + 1] - x[i - 1]) - sig * u[i - 1]) / p;
    }
    y2[n - 1] = 0.0;
    for k in (0..n - 1).rev() {
        y2[k] = y2[k] * y2[k + 1] + u[k];
    }
    y2
}

/// Piecewise-linear lookup over an increasing abscissa, clamped at the ends.
pub fn linear_lookup(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }
    if n == 1 || x <= xs[0] {
        return Some(ys[0]);
    }
    if x >= xs[n - 1] {
        return Some(ys[n - 1]);
    }
    let i = xs[..n].partition_point(|&sample| sample <= x).saturating_sub(1);
    let span = xs[i + 1] - xs[i];
    if span <= 0.0 {
        return Some(ys[i]);
    }
    Some(ys[i] + (x - xs[i]) / span * (ys[i + 1] - ys[i]))
}

/// Maps an angle difference into [-180, 180).
pub fn wrap_half_turn(delta: f64) -> f64 {
    (delta + 180.0).rem_euclid(360.0) - 180.0
}

pub fn wrap_heading(heading: f64) -> f64 {
    heading.rem_euclid(360.0)
}

/// Normalizes a longitude into the range selected by `lonflip`.
pub fn apply_lonflip(lon: f64, lonflip: i32) -> f64 {
    match lonflip {
        l if l < 0 => {
            let wrapped = wrap_half_turn(lon);
            if wrapped > 0.0 {
                wrapped - 360.0
            } else {
                wrapped
            }
        }
        0 => wrap_half_turn(lon),
        _ => lon.rem_euclid(360.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> TimeSeries {
        let times = (0..values.len()).map(|i| i as f64 * 10.0).collect();
        TimeSeries::new("test", times, values.to_vec()).unwrap()
    }

    #[test]
    fn linear_midpoint_and_clamp() {
        let s = series(&[0.0, 10.0, 30.0]);
        let mut cursor = Cursor::default();
        assert_eq!(s.interp(&mut cursor, -5.0, Method::Linear), 0.0);
        assert_eq!(s.interp(&mut cursor, 5.0, Method::Linear), 5.0);
        assert_eq!(s.interp(&mut cursor, 15.0, Method::Linear), 20.0);
        assert_eq!(cursor.index(), 1);
        assert_eq!(s.interp(&mut cursor, 99.0, Method::Linear), 30.0);
    }

    #[test]
    fn backward_query_reseeks() {
        let s = series(&[0.0, 10.0, 20.0, 30.0]);
        let mut cursor = Cursor::default();
        s.interp(&mut cursor, 25.0, Method::Linear);
        assert_eq!(cursor.index(), 2);
        assert_eq!(s.interp(&mut cursor, 5.0, Method::Linear), 5.0);
        assert_eq!(cursor.index(), 0);
    }

    #[test]
    fn spline_reproduces_straight_lines() {
        let s = series(&[1.0, 3.0, 5.0, 7.0, 9.0]).with_spline();
        let mut cursor = Cursor::default();
        let value = s.interp(&mut cursor, 17.5, Method::Spline);
        assert!((value - 4.5).abs() < 1e-12);
    }

    #[test]
    fn spline_passes_through_knots() {
        let s = series(&[0.0, 4.0, 1.0, 8.0]).with_spline();
        let mut cursor = Cursor::default();
        assert!((s.interp(&mut cursor, 20.0, Method::Spline) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn heading_takes_shortest_path() {
        let s = series(&[350.0, 10.0]);
        let mut cursor = Cursor::default();
        let mid = s.interp(&mut cursor, 5.0, Method::Heading);
        assert!(mid.abs() < 1e-9 || (mid - 360.0).abs() < 1e-9);
        let quarter = s.interp(&mut cursor, 7.5, Method::Heading);
        assert!((quarter - 5.0).abs() < 1e-9);
    }

    #[test]
    fn longitude_crosses_antimeridian() {
        let s = series(&[179.0, -179.0]);
        let mut cursor = Cursor::default();
        let value = s.interp(&mut cursor, 2.5, Method::Longitude);
        assert!((apply_lonflip(value, 0) - 179.5).abs() < 1e-9);
    }

    #[test]
    fn short_series_is_rejected() {
        let err = TimeSeries::new("nav", vec![0.0], vec![1.0]).unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
        let err = TimeSeries::new("nav", vec![0.0, 0.0], vec![1.0, 2.0]).unwrap_err();
        assert!(err.to_string().contains("not increasing"));
    }

    #[test]
    fn lonflip_ranges() {
        assert_eq!(apply_lonflip(190.0, 0), -170.0);
        assert_eq!(apply_lonflip(-170.0, 1), 190.0);
        assert_eq!(apply_lonflip(10.0, -1), -350.0);
    }

    #[test]
    fn linear_lookup_clamps() {
        let xs = [-60.0, 0.0, 60.0];
        let ys = [1.0, 0.0, 3.0];
        assert_eq!(linear_lookup(&xs, &ys, -80.0), Some(1.0));
        assert_eq!(linear_lookup(&xs, &ys, 30.0), Some(1.5));
        assert_eq!(linear_lookup(&[], &[], 0.0), None);
    }
}
