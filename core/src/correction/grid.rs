use crate::math::coor_scale;
use crate::prelude::{StageError, StageResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Geographic extent and spacing of a topography grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridHeader {
    pub n_columns: usize,
    pub n_rows: usize,
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub dx: f64,
    pub dy: f64,
    pub nodata: f32,
}

#[derive(Deserialize)]
struct GridFile {
    #[serde(flatten)]
    header: GridHeader,
    /// Row-major, row 0 at `ymin`.
    values: Vec<f32>,
}

/// Read-only elevation grid (positive up, metres) in geographic coordinates.
#[derive(Debug, Clone)]
pub struct TopoGrid {
    header: GridHeader,
    /// Indexed `[[column, row]]`.
    data: Array2<f32>,
}

/// Position and attitude needed to place a footprint on the grid.
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    pub longitude: f64,
    pub latitude: f64,
    pub heading: f64,
    pub sensor_depth: f64,
    pub acrosstrack: f64,
    pub alongtrack: f64,
}

impl TopoGrid {
    pub fn load<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            StageError::Configuration(format!(
                "unable to read topography grid {}: {}",
                path.display(),
                err
            ))
        })?;
        let file: GridFile = serde_json::from_str(&text).map_err(|err| {
            StageError::Configuration(format!("{}: {}", path.display(), err))
        })?;
        Self::from_values(file.header, file.values)
    }

    pub fn from_values(header: GridHeader, values: Vec<f32>) -> StageResult<Self> {
        if header.n_columns < 3 || header.n_rows < 3 || header.dx <= 0.0 || header.dy <= 0.0 {
            return Err(StageError::Configuration(format!(
                "degenerate topography grid {}x{} spacing {}x{}",
                header.n_columns, header.n_rows, header.dx, header.dy
            )));
        }
        let data = Array2::from_shape_vec((header.n_rows, header.n_columns), values)
            .map_err(|err| StageError::Configuration(format!("topography grid values: {}", err)))?
            .reversed_axes();
        Ok(Self { header, data })
    }

    pub fn header(&self) -> &GridHeader {
        &self.header
    }

    /// Elevation at a cell, `None` for nodata or outside the grid.
    pub fn value(&self, i: usize, j: usize) -> Option<f64> {
        let value = *self.data.get((i, j))?;
        if value.is_nan() || value == self.header.nodata {
            None
        } else {
            Some(value as f64)
        }
    }

    /// Nearest cell to a position.
    pub fn cell(&self, longitude: f64, latitude: f64) -> Option<(usize, usize)> {
        let i = ((longitude - self.header.xmin) / self.header.dx).round();
        let j = ((latitude - self.header.ymin) / self.header.dy).round();
        if i < 0.0 || j < 0.0 {
            return None;
        }
        let (i, j) = (i as usize, j as usize);
        (i < self.header.n_columns && j < self.header.n_rows).then_some((i, j))
    }

    /// Signed incidence angle in degrees between the ray to `footprint` and
    /// the seafloor, plus the footprint altitude below the sonar.
    ///
    /// With `use_slope` the normal comes from the grid's diagonal tangents,
    /// otherwise the seafloor is taken as level. `None` when the footprint or
    /// any diagonal neighbour lacks data.
    pub fn incidence_angle(&self, footprint: &Footprint, use_slope: bool) -> Option<(f64, f64)> {
        let (mtodeglon, mtodeglat) = coor_scale(footprint.latitude);
        let (sh, ch) = footprint.heading.to_radians().sin_cos();
        let east = footprint.acrosstrack * ch + footprint.alongtrack * sh;
        let north = -footprint.acrosstrack * sh + footprint.alongtrack * ch;
        let lon = footprint.longitude + east * mtodeglon;
        let lat = footprint.latitude + north * mtodeglat;

        let (i, j) = self.cell(lon, lat)?;
        if i == 0 || j == 0 {
            return None;
        }
        let centre = self.value(i, j)?;
        let sw = self.value(i - 1, j - 1)?;
        let se = self.value(i + 1, j - 1)?;
        let nw = self.value(i - 1, j + 1)?;
        let ne = self.value(i + 1, j + 1)?;

        let altitude = -centre - footprint.sensor_depth;
        if altitude <= 0.0 {
            return None;
        }
        // look vector from the seafloor back to the sonar, east/north/up
        let look = [-east, -north, altitude];
        let normal = if use_slope {
            let cell_x = 2.0 * self.header.dx / mtodeglon;
            let cell_y = 2.0 * self.header.dy / mtodeglat;
            let rising = [cell_x, cell_y, ne - sw];
            let falling = [-cell_x, cell_y, nw - se];
            cross(rising, falling)
        } else {
            [0.0, 0.0, 1.0]
        };
        let cosine = dot(look, normal) / (norm(look) * norm(normal));
        let angle = cosine.clamp(-1.0, 1.0).acos().to_degrees();
        let signed = if footprint.acrosstrack < 0.0 { -angle } else { angle };
        Some((signed, altitude))
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn header(n: usize) -> GridHeader {
        GridHeader {
            n_columns: n,
            n_rows: n,
            xmin: -0.01,
            xmax: 0.01,
            ymin: -0.01,
            ymax: 0.01,
            dx: 0.02 / (n - 1) as f64,
            dy: 0.02 / (n - 1) as f64,
            nodata: -99999.0,
        }
    }

    fn flat(n: usize, elevation: f32) -> TopoGrid {
        TopoGrid::from_values(header(n), vec![elevation; n * n]).unwrap()
    }

    fn footprint(across: f64) -> Footprint {
        Footprint {
            longitude: 0.0,
            latitude: 0.0,
            heading: 0.0,
            sensor_depth: 0.0,
            acrosstrack: across,
            alongtrack: 0.0,
        }
    }

    #[test]
    fn flat_grid_matches_flat_bottom_geometry() {
        let grid = flat(41, -100.0);
        let (angle, altitude) = grid.incidence_angle(&footprint(100.0), true).unwrap();
        assert_eq!(altitude, 100.0);
        assert!((angle - 45.0).abs() < 0.5);
        let (port, _) = grid.incidence_angle(&footprint(-100.0), false).unwrap();
        assert!(port < 0.0);
    }

    #[test]
    fn nodata_neighbour_gives_no_angle() {
        let n = 41;
        let mut values = vec![-100.0f32; n * n];
        values[21 * n + 21] = -99999.0;
        let grid = TopoGrid::from_values(header(n), values).unwrap();
        assert!(grid.incidence_angle(&footprint(0.0), true).is_none());
    }

    #[test]
    fn values_are_row_major_from_ymin() {
        let mut values = vec![0.0f32; 9];
        // row 1, column 2
        values[5] = 7.0;
        let grid = TopoGrid::from_values(header(3), values).unwrap();
        assert_eq!(grid.value(2, 1), Some(7.0));
        assert_eq!(grid.value(1, 2), Some(0.0));
        assert_eq!(grid.value(3, 0), None);
    }

    #[test]
    fn load_json_grid() {
        let mut temp = NamedTempFile::new().unwrap();
        let h = header(3);
        let json = serde_json::json!({
            "n_columns": h.n_columns, "n_rows": h.n_rows,
            "xmin": h.xmin, "xmax": h.xmax, "ymin": h.ymin, "ymax": h.ymax,
            "dx": h.dx, "dy": h.dy, "nodata": h.nodata,
            "values": vec![-50.0f32; 9],
        });
        temp.write_all(json.to_string().as_bytes()).unwrap();
        let grid = TopoGrid::load(temp.path()).unwrap();
        assert_eq!(grid.cell(0.0, 0.0), Some((1, 1)));
        assert_eq!(grid.value(1, 1), Some(-50.0));
        assert!(TopoGrid::from_values(h, vec![0.0; 4]).is_err());
    }
}
