use crate::math::coor_scale;
use crate::ping::{Ping, Record};
use crate::prelude::{StageError, StageResult};
use crate::sensors::formats::calendar_fields;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Positions this close to 0/0 are treated as missing navigation.
const NULL_ISLAND: f64 = 0.005;

fn has_position(longitude: f64, latitude: f64) -> bool {
    longitude.abs() >= NULL_ISLAND || latitude.abs() >= NULL_ISLAND
}

/// Longitude and latitude of an across/along-track offset from the vessel.
fn offset_position(ping: &Ping, across: f64, along: f64) -> (f64, f64) {
    let platform = &ping.platform;
    let (mtodeglon, mtodeglat) = coor_scale(platform.latitude);
    let (sh, ch) = platform.heading.to_radians().sin_cos();
    let east = across * ch + along * sh;
    let north = -across * sh + along * ch;
    (
        platform.longitude + east * mtodeglon,
        platform.latitude + north * mtodeglat,
    )
}

/// Fast-navigation table: one text line per ping.
pub struct FnvWriter {
    writer: BufWriter<File>,
}

impl FnvWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    /// Port and starboard edges of the good swath, or the vessel position.
    fn swath_edges(ping: &Ping) -> ((f64, f64), (f64, f64)) {
        let port = ping
            .good_beams()
            .min_by(|a, b| a.1.acrosstrack.total_cmp(&b.1.acrosstrack));
        let starboard = ping
            .good_beams()
            .max_by(|a, b| a.1.acrosstrack.total_cmp(&b.1.acrosstrack));
        match (port, starboard) {
            (Some((_, port)), Some((_, starboard))) => (
                offset_position(ping, port.acrosstrack, port.alongtrack),
                offset_position(ping, starboard.acrosstrack, starboard.alongtrack),
            ),
            _ => {
                let centre = (ping.platform.longitude, ping.platform.latitude);
                (centre, centre)
            }
        }
    }

    pub fn line(ping: &Ping) -> StageResult<String> {
        let (year, month, day, hour, minute, second) = calendar_fields(ping.time)
            .ok_or_else(|| StageError::InvalidInput(format!("time {} out of range", ping.time)))?;
        let p = &ping.platform;
        let ((port_lon, port_lat), (stbd_lon, stbd_lat)) = Self::swath_edges(ping);
        Ok(format!(
            "{:04} {:02} {:02} {:02} {:02} {:09.6}\t{:.6}\t{:.9}\t{:.9}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.9}\t{:.9}\t{:.9}\t{:.9}",
            year, month, day, hour, minute, second,
            ping.time, p.longitude, p.latitude, p.heading, p.speed,
            p.draft, p.roll, p.pitch, p.heave,
            port_lon, port_lat, stbd_lon, stbd_lat
        ))
    }

    pub fn write_ping(&mut self, ping: &Ping) -> StageResult<()> {
        let line = Self::line(ping)?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    pub fn finish(mut self) -> StageResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reduced bathymetry: JSON lines of pings stripped of backscatter.
pub struct FbtWriter {
    writer: BufWriter<File>,
}

impl FbtWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write_ping(&mut self, ping: &Ping) -> StageResult<()> {
        let record = Record::Ping(ping.bathymetry_only());
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|err| StageError::Internal(format!("encoding bathymetry record: {}", err)))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn finish(mut self) -> StageResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    min: f64,
    max: f64,
}

impl Span {
    fn extend(span: &mut Option<Span>, value: f64) {
        match span {
            Some(s) => {
                s.min = s.min.min(value);
                s.max = s.max.max(value);
            }
            None => *span = Some(Span { min: value, max: value }),
        }
    }
}

/// Running coverage statistics for the inventory summary.
#[derive(Debug, Clone, Default)]
pub struct BoundsAccumulator {
    pub pings: usize,
    pub comments: usize,
    pub beams: usize,
    pub good_beams: usize,
    pub flagged_beams: usize,
    pub null_beams: usize,
    pub pixels: usize,
    pub good_pixels: usize,
    time: Option<Span>,
    longitude: Option<Span>,
    latitude: Option<Span>,
    depth: Option<Span>,
    amplitude: Option<Span>,
    sidescan: Option<Span>,
}

impl BoundsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_comment(&mut self) {
        self.comments += 1;
    }

    pub fn add_ping(&mut self, ping: &Ping) {
        self.pings += 1;
        Span::extend(&mut self.time, ping.time);
        if has_position(ping.platform.longitude, ping.platform.latitude) {
            Span::extend(&mut self.longitude, ping.platform.longitude);
            Span::extend(&mut self.latitude, ping.platform.latitude);
        }
        for beam in &ping.beams {
            self.beams += 1;
            if beam.flag.is_null() {
                self.null_beams += 1;
                continue;
            }
            if beam.flag.is_flagged() {
                self.flagged_beams += 1;
                continue;
            }
            self.good_beams += 1;
            Span::extend(&mut self.depth, beam.depth);
            Span::extend(&mut self.amplitude, beam.amplitude);
            let (lon, lat) = offset_position(ping, beam.acrosstrack, beam.alongtrack);
            if has_position(lon, lat) {
                Span::extend(&mut self.longitude, lon);
                Span::extend(&mut self.latitude, lat);
            }
        }
        for pixel in &ping.pixels {
            self.pixels += 1;
            if let Some(value) = pixel.intensity {
                self.good_pixels += 1;
                Span::extend(&mut self.sidescan, value);
            }
        }
    }

    /// `(min_lon, max_lon, min_lat, max_lat)` of valid positions.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let lon = self.longitude?;
        let lat = self.latitude?;
        Some((lon.min, lon.max, lat.min, lat.max))
    }

    pub fn depth_range(&self) -> Option<(f64, f64)> {
        self.depth.map(|span| (span.min, span.max))
    }

    fn format_time(epoch: f64) -> String {
        calendar_fields(epoch)
            .map(|(y, mo, d, h, mi, s)| {
                format!("{:04}/{:02}/{:02} {:02}:{:02}:{:09.6}", y, mo, d, h, mi, s)
            })
            .unwrap_or_else(|| format!("{:.6}", epoch))
    }

    pub fn render(&self, source: &str) -> String {
        let mut out = String::new();
        let percent = |part: usize, whole: usize| {
            if whole == 0 {
                0.0
            } else {
                100.0 * part as f64 / whole as f64
            }
        };
        out.push_str(&format!("Swath Data File:      {}\n\n", source));
        out.push_str("Data Totals:\n");
        out.push_str(&format!("Number of Records:         {:8}\n", self.pings));
        out.push_str(&format!("Number of Comments:        {:8}\n", self.comments));
        out.push_str("Bathymetry Data:\n");
        out.push_str(&format!("  Number of Beams:         {:8}\n", self.beams));
        out.push_str(&format!(
            "  Number of Good Beams:    {:8}     {:5.2}%\n",
            self.good_beams,
            percent(self.good_beams, self.beams)
        ));
        out.push_str(&format!(
            "  Number of Zero Beams:    {:8}     {:5.2}%\n",
            self.null_beams,
            percent(self.null_beams, self.beams)
        ));
        out.push_str(&format!(
            "  Number of Flagged Beams: {:8}     {:5.2}%\n",
            self.flagged_beams,
            percent(self.flagged_beams, self.beams)
        ));
        out.push_str("Sidescan Data:\n");
        out.push_str(&format!("  Number of Pixels:        {:8}\n", self.pixels));
        out.push_str(&format!(
            "  Number of Good Pixels:   {:8}     {:5.2}%\n",
            self.good_pixels,
            percent(self.good_pixels, self.pixels)
        ));
        if let Some(time) = self.time {
            out.push_str(&format!("\nStart of Data:  {}  {:.6}\n", Self::format_time(time.min), time.min));
            out.push_str(&format!("End of Data:    {}  {:.6}\n", Self::format_time(time.max), time.max));
        }
        out.push_str("\nLimits:\n");
        if let Some((lon_min, lon_max, lat_min, lat_max)) = self.bounds() {
            out.push_str(&format!(
                "Minimum Longitude: {:14.9}   Maximum Longitude: {:14.9}\n",
                lon_min, lon_max
            ));
            out.push_str(&format!(
                "Minimum Latitude:  {:14.9}   Maximum Latitude:  {:14.9}\n",
                lat_min, lat_max
            ));
        }
        for (label, span) in [
            ("Depth", self.depth),
            ("Amplitude", self.amplitude),
            ("Sidescan", self.sidescan),
        ] {
            if let Some(span) = span {
                out.push_str(&format!(
                    "Minimum {:<10} {:14.4}   Maximum {:<10} {:14.4}\n",
                    format!("{}:", label),
                    span.min,
                    format!("{}:", label),
                    span.max
                ));
            }
        }
        out
    }

    pub fn write<P: AsRef<Path>>(&self, path: P, source: &str) -> StageResult<()> {
        std::fs::write(path, self.render(source))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::{Beam, BeamFlag, Platform};
    use tempfile::tempdir;

    fn ping(longitude: f64, latitude: f64) -> Ping {
        let mut ping = Ping {
            time: 1_072_915_200.5,
            platform: Platform {
                longitude,
                latitude,
                heading: 90.0,
                ..Default::default()
            },
            beams: vec![
                Beam::sounding(100.0, -50.0, 0.0),
                Beam::sounding(110.0, 50.0, 0.0),
                Beam::sounding(120.0, 80.0, 0.0),
            ],
            ..Default::default()
        };
        ping.beams[2].flag = BeamFlag::Manual;
        ping
    }

    #[test]
    fn fnv_line_has_calendar_time_and_edges() {
        let line = FnvWriter::line(&ping(10.0, 0.0)).unwrap();
        assert!(line.starts_with("2004 01 01 00 00 00.500000\t1072915200.500000\t10.000000000"));
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 14);
        assert_eq!(fields[4], "90.000");
        // heading east: starboard edge lies south of the vessel
        let stbd_lat: f64 = fields[13].parse().unwrap();
        assert!(stbd_lat < 0.0);
        let port_lat: f64 = fields[11].parse().unwrap();
        assert!(port_lat > 0.0);
    }

    #[test]
    fn positions_near_origin_are_ignored() {
        let mut bounds = BoundsAccumulator::new();
        bounds.add_ping(&ping(0.001, 0.001));
        assert_eq!(bounds.bounds(), None);
        assert_eq!(bounds.good_beams, 2);
        assert_eq!(bounds.flagged_beams, 1);
        bounds.add_ping(&ping(12.0, 45.0));
        let (lon_min, lon_max, lat_min, lat_max) = bounds.bounds().unwrap();
        assert!(lon_min == 12.0 && lon_max == 12.0);
        assert!(lat_min < 45.0 && lat_max > 45.0);
        assert_eq!(bounds.depth_range(), Some((100.0, 110.0)));
    }

    #[test]
    fn fbt_and_inf_files_are_written() {
        let dir = tempdir().unwrap();
        let mut p = ping(12.0, 45.0);
        p.beams[0].amplitude = 33.0;
        let mut fbt = FbtWriter::create(dir.path().join("out.fbt")).unwrap();
        fbt.write_ping(&p).unwrap();
        fbt.finish().unwrap();
        let text = std::fs::read_to_string(dir.path().join("out.fbt")).unwrap();
        let record: Record = serde_json::from_str(text.trim()).unwrap();
        match record {
            Record::Ping(reduced) => assert_eq!(reduced.beams[0].amplitude, 0.0),
            other => panic!("unexpected record {:?}", other),
        }

        let mut bounds = BoundsAccumulator::new();
        bounds.add_ping(&p);
        bounds.write(dir.path().join("out.inf"), "out.jsonl").unwrap();
        let inf = std::fs::read_to_string(dir.path().join("out.inf")).unwrap();
        assert!(inf
            .lines()
            .any(|line| line.starts_with("Number of Records:") && line.ends_with(" 1")));
        assert!(inf.contains("Start of Data:  2004/01/01 00:00:00.500000"));
    }
}
