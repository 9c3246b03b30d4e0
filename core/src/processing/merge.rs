use crate::config::{DraftMode, HeadingMode, InterpAlgorithm, NavAdjustMode};
use crate::interp::{apply_lonflip, wrap_heading, Cursor, Method, TimeSeries};
use crate::math::coor_scale;
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::ping::Ping;
use crate::sensors::{lever_heave, load_scalar, AdjustedNav, AttitudeSeries, NavSeries};
use crate::telemetry::log::LogManager;

/// A loaded series with its own query cursor.
struct Track {
    series: TimeSeries,
    cursor: Cursor,
}

impl Track {
    fn new(series: TimeSeries) -> Self {
        Self {
            series,
            cursor: Cursor::default(),
        }
    }

    fn at(&mut self, t: f64, method: Method) -> f64 {
        self.series.interp(&mut self.cursor, t, method)
    }

    /// Spline inside the series span when requested, longitude-safe linear otherwise.
    fn position(&mut self, t: f64, spline: bool, fallback: Method) -> f64 {
        let method = if spline && self.series.contains(t) {
            Method::Spline
        } else {
            fallback
        };
        self.at(t, method)
    }
}

fn optional(series: Option<TimeSeries>) -> Option<Track> {
    series.map(Track::new)
}

#[derive(Default)]
struct NavTracks {
    longitude: Option<Track>,
    latitude: Option<Track>,
    heading: Option<Track>,
    speed: Option<Track>,
    draft: Option<Track>,
    roll: Option<Track>,
    pitch: Option<Track>,
    heave: Option<Track>,
}

#[derive(Default)]
struct AttitudeTracks {
    roll: Option<Track>,
    pitch: Option<Track>,
    heave: Option<Track>,
}

/// Merges auxiliary sensor series into the platform state of each ping.
///
/// Order: navigation, attitude, sensor depth, position shift, draft,
/// adjusted navigation, tide, lever arm, heading and speed.
pub struct MergeStage {
    config: Option<ProcessConfig>,
    nav: NavTracks,
    attitude: AttitudeTracks,
    sensordepth: Option<Track>,
    tide: Option<Track>,
    adjusted_lon: Option<Track>,
    adjusted_lat: Option<Track>,
    adjusted_depth: Option<Track>,
    previous_fix: Option<(f64, f64, f64)>,
    logger: LogManager,
}

impl MergeStage {
    pub fn new() -> Self {
        Self {
            config: None,
            nav: NavTracks::default(),
            attitude: AttitudeTracks::default(),
            sensordepth: None,
            tide: None,
            adjusted_lon: None,
            adjusted_lat: None,
            adjusted_depth: None,
            previous_fix: None,
            logger: LogManager::new("merge"),
        }
    }

    fn load_nav(&mut self, config: &ProcessConfig) -> StageResult<()> {
        let section = &config.nav;
        let path = section.file.as_ref().ok_or_else(|| {
            StageError::Configuration("navigation merge enabled without a file".into())
        })?;
        let mut nav = NavSeries::load(path, section.format, config.lonflip, section.time_shift)?;
        if section.algorithm == InterpAlgorithm::Spline {
            nav = nav.with_spline();
        }
        let want = |enabled: bool, series: Option<TimeSeries>, what: &str| {
            if enabled && series.is_none() {
                self.logger.warn(&format!(
                    "{} data missing from {}, {} merge disabled",
                    what,
                    path.display(),
                    what
                ));
            }
            if enabled {
                optional(series)
            } else {
                None
            }
        };
        let attitude = section.attitude && nav.has_attitude();
        if section.attitude && !attitude {
            want(true, None, "attitude");
        }
        self.nav = NavTracks {
            heading: want(section.heading, nav.heading, "heading"),
            speed: want(section.speed, nav.speed, "speed"),
            draft: want(section.draft, nav.draft, "draft"),
            roll: if attitude { optional(nav.roll) } else { None },
            pitch: if attitude { optional(nav.pitch) } else { None },
            heave: if attitude { optional(nav.heave) } else { None },
            longitude: Some(Track::new(nav.longitude)),
            latitude: Some(Track::new(nav.latitude)),
        };
        Ok(())
    }

    fn merge_navigation(&mut self, ping: &mut Ping, config: &ProcessConfig) {
        let spline = config.nav.algorithm == InterpAlgorithm::Spline;
        let t = ping.time;
        let platform = &mut ping.platform;
        if let (Some(lon), Some(lat)) = (self.nav.longitude.as_mut(), self.nav.latitude.as_mut()) {
            platform.longitude = apply_lonflip(lon.position(t, spline, Method::Longitude), config.lonflip);
            platform.latitude = lat.position(t, spline, Method::Linear);
        }
        if let Some(track) = self.nav.heading.as_mut() {
            platform.heading = track.at(t, Method::Heading);
        }
        if let Some(track) = self.nav.speed.as_mut() {
            platform.speed = track.at(t, Method::Linear);
        }
        if let Some(track) = self.nav.draft.as_mut() {
            platform.draft = track.at(t, Method::Linear);
        }
        if let Some(track) = self.nav.roll.as_mut() {
            platform.roll = track.at(t, Method::Linear);
        }
        if let Some(track) = self.nav.pitch.as_mut() {
            platform.pitch = track.at(t, Method::Linear);
        }
        if let Some(track) = self.nav.heave.as_mut() {
            platform.heave = track.at(t, Method::Linear);
        }
    }

    fn merge_attitude(&mut self, ping: &mut Ping) {
        let t = ping.time;
        if let Some(track) = self.attitude.roll.as_mut() {
            ping.platform.roll = track.at(t, Method::Linear);
        }
        if let Some(track) = self.attitude.pitch.as_mut() {
            ping.platform.pitch = track.at(t, Method::Linear);
        }
        if let Some(track) = self.attitude.heave.as_mut() {
            ping.platform.heave = track.at(t, Method::Linear);
        }
    }

    fn shift_position(ping: &mut Ping, config: &ProcessConfig) {
        let shift = &config.nav_shift;
        let x = shift.shift_x - shift.offset_x;
        let y = shift.shift_y - shift.offset_y;
        let platform = &mut ping.platform;
        let (mtodeglon, mtodeglat) = coor_scale(platform.latitude);
        let (sh, ch) = platform.heading.to_radians().sin_cos();
        platform.longitude += (x * ch + y * sh) * mtodeglon + shift.shift_lon;
        platform.latitude += (-x * sh + y * ch) * mtodeglat + shift.shift_lat;
    }

    fn adjust_draft(ping: &mut Ping, config: &ProcessConfig) {
        let draft = &config.draft;
        let platform = &mut ping.platform;
        platform.draft = match draft.mode {
            DraftMode::Off => platform.draft,
            DraftMode::Set => draft.value,
            DraftMode::Offset => platform.draft + draft.offset,
            DraftMode::Multiply => platform.draft * draft.multiply,
            DraftMode::MultiplyOffset => platform.draft * draft.multiply + draft.offset,
        };
    }

    /// Course made good from the previous ping's position.
    fn course_made_good(&mut self, ping: &mut Ping) {
        let platform = &mut ping.platform;
        let fix = (ping.time, platform.longitude, platform.latitude);
        if let Some((time, lon, lat)) = self.previous_fix {
            let dt = ping.time - time;
            let (mtodeglon, mtodeglat) = coor_scale(platform.latitude);
            let east = (platform.longitude - lon) / mtodeglon;
            let north = (platform.latitude - lat) / mtodeglat;
            let distance = east.hypot(north);
            if dt > 0.0 && distance > 0.0 {
                platform.heading = wrap_heading(east.atan2(north).to_degrees());
                platform.speed = 3.6 * distance / dt;
            }
        }
        self.previous_fix = Some(fix);
    }
}

impl Default for MergeStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for MergeStage {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        if config.nav.enabled {
            self.load_nav(config)?;
        }
        if config.attitude.enabled {
            let path = config.attitude.file.as_ref().ok_or_else(|| {
                StageError::Configuration("attitude merge enabled without a file".into())
            })?;
            let attitude = AttitudeSeries::load(path, config.attitude.format)?;
            self.attitude = AttitudeTracks {
                roll: Some(Track::new(attitude.roll)),
                pitch: Some(Track::new(attitude.pitch)),
                heave: Some(Track::new(attitude.heave)),
            };
        }
        for (enabled, file, format, label, slot) in [
            (
                config.sensordepth.enabled,
                &config.sensordepth.file,
                config.sensordepth.format,
                "sensordepth",
                &mut self.sensordepth,
            ),
            (
                config.tide.enabled,
                &config.tide.file,
                config.tide.format,
                "tide",
                &mut self.tide,
            ),
        ] {
            if !enabled {
                continue;
            }
            let path = file.as_ref().ok_or_else(|| {
                StageError::Configuration(format!("{} merge enabled without a file", label))
            })?;
            *slot = Some(Track::new(load_scalar(path, format, label)?));
        }
        if config.nav_adjust.mode != NavAdjustMode::Off {
            let path = config.nav_adjust.file.as_ref().ok_or_else(|| {
                StageError::Configuration("adjusted navigation enabled without a file".into())
            })?;
            let with_depth = config.nav_adjust.mode == NavAdjustMode::LonLatDepth;
            let mut adjusted = AdjustedNav::load(path, config.lonflip, with_depth)?;
            if config.nav_adjust.algorithm == InterpAlgorithm::Spline {
                adjusted = adjusted.with_spline();
            }
            self.adjusted_lon = Some(Track::new(adjusted.longitude));
            self.adjusted_lat = Some(Track::new(adjusted.latitude));
            self.adjusted_depth = optional(adjusted.depth);
        }
        self.previous_fix = None;
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        let config = self
            .config
            .take()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        let t = ping.time;

        self.merge_navigation(ping, &config);
        self.merge_attitude(ping);
        if let Some(track) = self.sensordepth.as_mut() {
            ping.platform.draft = track.at(t, Method::Linear) - ping.platform.heave;
        }
        if config.nav_shift.enabled {
            Self::shift_position(ping, &config);
        }
        Self::adjust_draft(ping, &config);

        if let (Some(lon), Some(lat)) = (self.adjusted_lon.as_mut(), self.adjusted_lat.as_mut()) {
            let spline = config.nav_adjust.algorithm == InterpAlgorithm::Spline;
            ping.platform.longitude =
                apply_lonflip(lon.position(t, spline, Method::Longitude), config.lonflip);
            ping.platform.latitude = lat.position(t, spline, Method::Linear);
        }
        if let Some(track) = self.adjusted_depth.as_mut() {
            ping.platform.draft += track.at(t, Method::Linear);
        }
        if let Some(track) = self.tide.as_mut() {
            ping.platform.draft -= track.at(t, Method::Linear);
        }

        if config.lever.enabled {
            let roll = ping.platform.roll + config.roll_bias.mean_bias();
            let pitch = ping.platform.pitch + config.pitch_bias.bias();
            ping.lever_heave = lever_heave(
                config.lever.sonar_offset,
                config.lever.vru_offset,
                roll,
                pitch,
            );
        }

        if matches!(
            config.heading.mode,
            HeadingMode::CourseMadeGood | HeadingMode::CourseMadeGoodOffset
        ) {
            self.course_made_good(ping);
        }
        if matches!(
            config.heading.mode,
            HeadingMode::Offset | HeadingMode::CourseMadeGoodOffset
        ) {
            ping.platform.heading = wrap_heading(ping.platform.heading + config.heading.offset);
        }

        self.config = Some(config);
        Ok(StageOutput::default())
    }

    fn cleanup(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::Platform;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(contents: &str) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(contents.as_bytes()).unwrap();
        temp
    }

    fn ping(time: f64) -> Ping {
        let mut ping = Ping {
            time,
            platform: Platform {
                longitude: 5.0,
                latitude: 5.0,
                heading: 90.0,
                draft: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        ping.begin_processing(0);
        ping
    }

    #[test]
    fn navigation_merge_replaces_position() {
        let nav = file("0 10.0 20.0\n10 10.1 20.1\n20 10.2 20.2\n");
        let mut config = ProcessConfig::default();
        config.nav.enabled = true;
        config.nav.format = 1;
        config.nav.algorithm = InterpAlgorithm::Linear;
        config.nav.file = Some(nav.path().to_path_buf());

        let mut stage = MergeStage::new();
        stage.initialize(&config).unwrap();
        let mut p = ping(5.0);
        stage.execute(&mut p).unwrap();
        assert!((p.platform.longitude - 10.05).abs() < 1e-9);
        assert!((p.platform.latitude - 20.05).abs() < 1e-9);
        assert_eq!(p.platform.heading, 90.0);
        stage.cleanup();
    }

    #[test]
    fn missing_nav_columns_disable_heading_merge() {
        let nav = file("0 10.0 20.0\n10 10.1 20.1\n");
        let mut config = ProcessConfig::default();
        config.nav.enabled = true;
        config.nav.format = 1;
        config.nav.heading = true;
        config.nav.file = Some(nav.path().to_path_buf());
        let mut stage = MergeStage::new();
        stage.initialize(&config).unwrap();
        let mut p = ping(5.0);
        stage.execute(&mut p).unwrap();
        assert_eq!(p.platform.heading, 90.0);
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let mut config = ProcessConfig::default();
        config.tide.enabled = true;
        config.tide.file = Some("/nonexistent/tide.txt".into());
        let err = MergeStage::new().initialize(&config).unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
    }

    #[test]
    fn sensordepth_tide_and_draft_offset_combine() {
        let depth = file("0 6.0\n100 6.0\n");
        let tide = file("0 0.5\n100 1.5\n");
        let mut config = ProcessConfig::default();
        config.sensordepth.enabled = true;
        config.sensordepth.file = Some(depth.path().to_path_buf());
        config.tide.enabled = true;
        config.tide.file = Some(tide.path().to_path_buf());
        config.draft.mode = DraftMode::Offset;
        config.draft.offset = 0.25;

        let mut stage = MergeStage::new();
        stage.initialize(&config).unwrap();
        let mut p = ping(50.0);
        p.platform.heave = 0.4;
        stage.execute(&mut p).unwrap();
        assert!((p.platform.draft - (6.0 - 0.4 + 0.25 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn course_made_good_follows_track() {
        let mut config = ProcessConfig::default();
        config.heading.mode = HeadingMode::CourseMadeGoodOffset;
        config.heading.offset = 1.0;
        let mut stage = MergeStage::new();
        stage.initialize(&config).unwrap();

        let mut first = ping(0.0);
        stage.execute(&mut first).unwrap();
        assert_eq!(first.platform.heading, 91.0);

        let mut second = ping(10.0);
        let (_, mtodeglat) = coor_scale(5.0);
        second.platform.latitude += 50.0 * mtodeglat;
        stage.execute(&mut second).unwrap();
        assert!((second.platform.heading - 1.0).abs() < 1e-6);
        assert!((second.platform.speed - 18.0).abs() < 1e-6);
    }

    #[test]
    fn lever_arm_sets_lever_heave() {
        let mut config = ProcessConfig::default();
        config.lever.enabled = true;
        config.lever.sonar_offset = [2.0, 0.0, 0.0];
        let mut stage = MergeStage::new();
        stage.initialize(&config).unwrap();
        let mut p = ping(0.0);
        p.platform.roll = 5.0;
        stage.execute(&mut p).unwrap();
        assert!((p.lever_heave - 2.0 * 5f64.to_radians().sin()).abs() < 1e-12);
    }

    #[test]
    fn execute_before_initialize_fails() {
        let mut stage = MergeStage::new();
        assert!(matches!(
            stage.execute(&mut ping(0.0)),
            Err(StageError::Internal(_))
        ));
    }
}
