//! In-memory ping model shared by every stage.
//!
//! A [`Ping`] is created by a source, mutated in place by the ordered stage
//! sequence and handed to a sink. Nothing is retained across pings apart
//! from interpolation cursors held by the stages themselves.

use serde::{Deserialize, Serialize};

/// Quality flag carried by each bathymetric beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BeamFlag {
    #[default]
    Ok,
    /// No valid solution; position and depth are meaningless.
    Null,
    Manual,
    Filter,
    Sonar,
}

impl BeamFlag {
    pub fn is_ok(self) -> bool {
        self == BeamFlag::Ok
    }

    pub fn is_null(self) -> bool {
        self == BeamFlag::Null
    }

    /// Flagged beams are non-null but rejected from the product.
    pub fn is_flagged(self) -> bool {
        matches!(self, BeamFlag::Manual | BeamFlag::Filter | BeamFlag::Sonar)
    }
}

/// One bathymetric solution within the swath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Beam {
    pub depth: f64,
    pub acrosstrack: f64,
    pub alongtrack: f64,
    pub flag: BeamFlag,
    pub amplitude: f64,
    /// Two-way travel time in seconds, zero when the sonar reports none.
    pub travel_time: f64,
    /// Take-off angle from vertical, degrees.
    pub angle: f64,
    /// Azimuth of the take-off vector, degrees (0 starboard, 90 forward).
    pub angle_forward: f64,
    /// Array null angle used by the incorrect-surface-velocity policy.
    pub angle_null: f64,
    /// Heave at transmit/receive for this beam.
    pub heave: f64,
    pub alongtrack_offset: f64,
}

impl Beam {
    pub fn sounding(depth: f64, acrosstrack: f64, alongtrack: f64) -> Self {
        Self {
            depth,
            acrosstrack,
            alongtrack,
            ..Default::default()
        }
    }
}

/// One sidescan sample. `None` intensity marks a null pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Pixel {
    pub intensity: Option<f64>,
    pub acrosstrack: f64,
    pub alongtrack: f64,
}

/// Vessel position and attitude at ping time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Platform {
    pub longitude: f64,
    pub latitude: f64,
    /// km/h
    pub speed: f64,
    pub heading: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heave: f64,
    pub draft: f64,
}

impl Platform {
    /// Depth of the sonar below the sea surface.
    pub fn sensor_depth(&self) -> f64 {
        self.draft + self.heave
    }
}

/// One transmit/receive cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Ping {
    /// Epoch seconds.
    pub time: f64,
    pub platform: Platform,
    pub altitude: f64,
    /// Surface sound velocity at the transducer, m/s.
    pub surface_velocity: f64,
    /// True when the beams carry sonar travel times and angles.
    pub has_travel_times: bool,
    pub beams: Vec<Beam>,
    pub pixels: Vec<Pixel>,
    #[serde(skip)]
    pub reported: Platform,
    #[serde(skip)]
    pub original_flags: Vec<BeamFlag>,
    #[serde(skip)]
    pub multiplicity: u32,
    #[serde(skip)]
    pub lever_heave: f64,
}

impl Ping {
    /// Snapshots the state later stages compare against.
    pub fn begin_processing(&mut self, multiplicity: u32) {
        self.reported = self.platform;
        self.original_flags = self.beams.iter().map(|beam| beam.flag).collect();
        self.multiplicity = multiplicity;
        self.lever_heave = 0.0;
    }

    pub fn good_beams(&self) -> impl Iterator<Item = (usize, &Beam)> {
        self.beams
            .iter()
            .enumerate()
            .filter(|(_, beam)| beam.flag.is_ok())
    }

    /// Copy of the ping without amplitude or sidescan.
    pub fn bathymetry_only(&self) -> Ping {
        let mut reduced = self.clone();
        reduced.pixels.clear();
        for beam in &mut reduced.beams {
            beam.amplitude = 0.0;
        }
        reduced
    }
}

/// Records yielded by a ping source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Ping(Ping),
    Comment { text: String },
}

/// Counts a ping cannot exceed before it is rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_beams: usize,
    pub max_pixels: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_beams: 1024,
            max_pixels: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_processing_snapshots_flags_and_platform() {
        let mut ping = Ping {
            time: 10.0,
            platform: Platform {
                draft: 2.0,
                heave: 0.5,
                ..Default::default()
            },
            beams: vec![Beam::sounding(100.0, 0.0, 0.0), Beam::default()],
            ..Default::default()
        };
        ping.beams[1].flag = BeamFlag::Manual;
        ping.begin_processing(2);

        assert_eq!(ping.original_flags, vec![BeamFlag::Ok, BeamFlag::Manual]);
        assert_eq!(ping.reported.sensor_depth(), 2.5);
        assert_eq!(ping.multiplicity, 2);
        assert_eq!(ping.good_beams().count(), 1);
    }

    #[test]
    fn record_json_is_tagged() {
        let record = Record::Comment {
            text: "survey line 4".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"comment\""));
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
