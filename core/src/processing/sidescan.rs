use super::buffer_pool::BufferPool;
use crate::config::SidescanRecalcConfig;
use crate::ping::{Ping, Pixel};
use crate::prelude::{ProcessConfig, ProcessingStage, StageError, StageOutput, StageResult};
use crate::telemetry::log::LogManager;

/// Re-bins sidescan pixels onto a uniform across-track grid.
pub struct SidescanStage {
    config: Option<SidescanRecalcConfig>,
    pool: BufferPool,
    logger: LogManager,
}

impl SidescanStage {
    pub fn new() -> Self {
        Self {
            config: None,
            pool: BufferPool::with_capacity(0, 0),
            logger: LogManager::new("sidescan"),
        }
    }

    fn swath_width(config: &SidescanRecalcConfig, ping: &Ping) -> f64 {
        if config.swath_width > 0.0 {
            return config.swath_width;
        }
        let beams = ping
            .good_beams()
            .map(|(_, beam)| beam.acrosstrack.abs())
            .fold(0.0, f64::max);
        if beams > 0.0 {
            return 2.0 * beams;
        }
        2.0 * ping
            .pixels
            .iter()
            .filter(|pixel| pixel.intensity.is_some())
            .map(|pixel| pixel.acrosstrack.abs())
            .fold(0.0, f64::max)
    }

    fn rebin(&mut self, config: &SidescanRecalcConfig, ping: &mut Ping) -> StageResult<bool> {
        let count = ping.pixels.len();
        let width = Self::swath_width(config, ping);
        if count == 0 || width <= 0.0 {
            return Ok(false);
        }
        let pixel_size = if config.pixel_size > 0.0 {
            config.pixel_size
        } else {
            width / count as f64
        };
        let centre = 0.5 * (count as f64 - 1.0);

        let mut sum = self.pool.checkout(count)?;
        let mut hits = self.pool.checkout(count)?;
        let mut along = self.pool.checkout(count)?;
        for pixel in &ping.pixels {
            let Some(value) = pixel.intensity else {
                continue;
            };
            let bin = (pixel.acrosstrack / pixel_size + centre).round();
            if bin < 0.0 || bin >= count as f64 {
                continue;
            }
            let bin = bin as usize;
            sum[bin] += value;
            hits[bin] += 1.0;
            along[bin] += pixel.alongtrack;
        }

        let mut pixels: Vec<Pixel> = (0..count)
            .map(|k| {
                let filled = hits[k] > 0.0;
                Pixel {
                    intensity: filled.then(|| sum[k] / hits[k]),
                    acrosstrack: (k as f64 - centre) * pixel_size,
                    alongtrack: if filled { along[k] / hits[k] } else { 0.0 },
                }
            })
            .collect();
        self.pool.release(sum);
        self.pool.release(hits);
        self.pool.release(along);

        fill_gaps(&mut pixels, config.interpolate);
        ping.pixels = pixels;
        Ok(true)
    }
}

impl Default for SidescanStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Linearly fills runs of at most `max_gap` empty pixels between filled ones.
fn fill_gaps(pixels: &mut [Pixel], max_gap: usize) {
    if max_gap == 0 {
        return;
    }
    let mut previous: Option<usize> = None;
    for k in 0..pixels.len() {
        let Some(value) = pixels[k].intensity else {
            continue;
        };
        if let Some(start) = previous {
            let gap = k - start - 1;
            if gap > 0 && gap <= max_gap {
                let (first, along_first) = (pixels[start].intensity.unwrap_or(value), pixels[start].alongtrack);
                let along_last = pixels[k].alongtrack;
                for m in start + 1..k {
                    let fraction = (m - start) as f64 / (k - start) as f64;
                    pixels[m].intensity = Some(first + fraction * (value - first));
                    pixels[m].alongtrack = along_first + fraction * (along_last - along_first);
                }
            }
        }
        previous = Some(k);
    }
}

impl ProcessingStage for SidescanStage {
    fn name(&self) -> &'static str {
        "sidescan"
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        let recalc = &config.sidescan_recalc;
        if recalc.enabled && (recalc.pixel_size < 0.0 || recalc.swath_width < 0.0) {
            return Err(StageError::Configuration(
                "sidescan pixel size and swath width must not be negative".into(),
            ));
        }
        self.pool = BufferPool::with_capacity(3, config.limits.max_pixels);
        self.config = Some(recalc.clone());
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        let config = self
            .config
            .take()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        if !config.enabled {
            self.config = Some(config);
            return Ok(StageOutput::default());
        }
        let result = self.rebin(&config, ping);
        self.config = Some(config);
        let mut output = StageOutput::default();
        if !result? && !ping.pixels.is_empty() {
            output.notes.push("no swath width for sidescan binning".into());
        }
        Ok(output)
    }

    fn cleanup(&mut self) {
        self.config = None;
        self.pool.reset();
        self.logger.record("scratch buffers released");
    }
}

/// Nulls sidescan outside the across-track span of good bathymetry.
pub struct BracketStage {
    enabled: Option<bool>,
}

impl BracketStage {
    pub fn new() -> Self {
        Self { enabled: None }
    }
}

impl Default for BracketStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for BracketStage {
    fn name(&self) -> &'static str {
        "bracket"
    }

    fn initialize(&mut self, config: &ProcessConfig) -> StageResult<()> {
        self.enabled = Some(config.sidescan_recalc.enabled || config.sidescan.enabled);
        Ok(())
    }

    fn execute(&mut self, ping: &mut Ping) -> StageResult<StageOutput> {
        let enabled = self
            .enabled
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        let mut output = StageOutput::default();
        if !enabled || ping.beams.is_empty() {
            return Ok(output);
        }
        let (low, high) = ping
            .good_beams()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), (_, beam)| {
                (low.min(beam.acrosstrack), high.max(beam.acrosstrack))
            });
        for pixel in &mut ping.pixels {
            if pixel.intensity.is_some() && !(pixel.acrosstrack >= low && pixel.acrosstrack <= high) {
                pixel.intensity = None;
                output.beams_changed += 1;
            }
        }
        Ok(output)
    }

    fn cleanup(&mut self) {
        self.enabled = None;
    }
}
