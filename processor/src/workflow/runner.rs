use super::config::with_suffix;
use anyhow::Context;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swathcore::config::ProcessConfig;
use swathcore::correction::TopoGrid;
use swathcore::edit::{reverse_edits, EditFileWriter, EsfHeader, EsfMode};
use swathcore::io::{
    BoundsAccumulator, FbtWriter, FnvWriter, JsonLinesSink, JsonLinesSource, PingSink, PingSource,
};
use swathcore::ping::Record;
use swathcore::processing::Pipeline;
use swathcore::telemetry::{FileMetrics, Identity};
use swathcore::StageError;

/// Everything one worker needs to process one file.
#[derive(Clone)]
pub struct FileTask {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: ProcessConfig,
    pub strip_comments: bool,
    pub grids: HashMap<PathBuf, Arc<TopoGrid>>,
    pub identity: Identity,
    /// Date stamped into generated comments and the reverse-edit header.
    pub date: String,
}

/// Side-output paths derived from the output file.
pub struct SideOutputs {
    pub fnv: PathBuf,
    pub fbt: PathBuf,
    pub inf: PathBuf,
    pub resf: PathBuf,
}

impl SideOutputs {
    pub fn for_output(output: &Path) -> Self {
        Self {
            fnv: with_suffix(output, "fnv"),
            fbt: with_suffix(output, "fbt"),
            inf: with_suffix(output, "inf"),
            resf: with_suffix(output, "resf"),
        }
    }
}

#[derive(Clone)]
pub struct Runner {
    task: FileTask,
}

impl Runner {
    pub fn new(task: FileTask) -> Self {
        Self { task }
    }

    fn header_comments(&self) -> Vec<String> {
        let task = &self.task;
        let mut lines = task.config.metadata.comment_lines();
        lines.push(format!(
            "Processed by {} version {} on {} by {} on {}",
            task.identity.program, task.identity.version, task.date, task.identity.user, task.identity.host
        ));
        lines.push(format!("Input file:  {}", task.input.display()));
        lines.push(format!("Output file: {}", task.output.display()));
        lines
    }

    /// Processes the whole file. Configuration failures return before any
    /// output exists; rejected pings are counted and skipped.
    pub fn execute(&self) -> anyhow::Result<FileMetrics> {
        let task = &self.task;
        let mut pipeline = Pipeline::new(task.grids.clone());
        pipeline
            .initialize(&task.config)
            .with_context(|| format!("initializing pipeline for {}", task.input.display()))?;
        let mut source = JsonLinesSource::open(&task.input)
            .with_context(|| format!("opening {}", task.input.display()))?;

        let side = SideOutputs::for_output(&task.output);
        let write_context = || format!("writing outputs for {}", task.output.display());
        let mut sink = JsonLinesSink::create(&task.output).with_context(write_context)?;
        let mut fnv = FnvWriter::create(&side.fnv).with_context(write_context)?;
        let mut fbt = FbtWriter::create(&side.fbt).with_context(write_context)?;
        let mut header = EsfHeader::new(EsfMode::Explicit, &task.identity);
        header.date = task.date.clone();
        let mut reverse = EditFileWriter::create(&side.resf, &header).with_context(write_context)?;
        let mut bounds = BoundsAccumulator::new();
        let mut metrics = FileMetrics::default();

        if !task.strip_comments {
            for text in self.header_comments() {
                sink.write_record(&Record::Comment { text })
                    .with_context(write_context)?;
                bounds.add_comment();
                metrics.comments += 1;
            }
        }

        loop {
            let record = match source.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) if err.rejects_ping() => {
                    warn!("{}: {}", task.input.display(), err);
                    metrics.pings_rejected += 1;
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("reading {}", task.input.display()))
                }
            };
            let mut ping = match record {
                Record::Comment { text } => {
                    if !task.strip_comments {
                        sink.write_record(&Record::Comment { text })
                            .with_context(write_context)?;
                        bounds.add_comment();
                        metrics.comments += 1;
                    }
                    continue;
                }
                Record::Ping(ping) => ping,
            };
            metrics.pings_read += 1;

            match pipeline.process(&mut ping) {
                Ok(output) => {
                    metrics.beams_nulled += output.beams_nulled;
                    if !output.notes.is_empty() {
                        metrics.pings_noted += 1;
                    }
                    for note in &output.notes {
                        debug!("{}: ping at {:.6}: {}", task.input.display(), ping.time, note);
                    }
                }
                Err(err) if err.rejects_ping() => {
                    warn!("{}: ping at {:.6} rejected: {}", task.input.display(), ping.time, err);
                    metrics.pings_rejected += 1;
                    continue;
                }
                Err(err) => return Err(stage_failure(err, &task.input)),
            }

            for edit in reverse_edits(&ping) {
                reverse.push(&edit).with_context(write_context)?;
                metrics.reverse_edits += 1;
            }
            let platform = ping.platform;
            sink.insert_navigation(&mut ping, &platform)
                .with_context(write_context)?;
            fnv.write_ping(&ping).with_context(write_context)?;
            fbt.write_ping(&ping).with_context(write_context)?;
            bounds.add_ping(&ping);
            sink.write_record(&Record::Ping(ping))
                .with_context(write_context)?;
            metrics.pings_written += 1;
        }

        sink.finish().with_context(write_context)?;
        fnv.finish().with_context(write_context)?;
        fbt.finish().with_context(write_context)?;
        reverse.finish().with_context(write_context)?;
        bounds
            .write(&side.inf, &task.output.display().to_string())
            .with_context(write_context)?;

        metrics.edits = pipeline.edit_summary();
        let flat = pipeline.flat_bottom_samples();
        pipeline.cleanup();
        report(&task.input, &metrics, flat);
        Ok(metrics)
    }
}

fn stage_failure(err: StageError, input: &Path) -> anyhow::Error {
    anyhow::Error::new(err).context(format!("processing {}", input.display()))
}

fn report(input: &Path, metrics: &FileMetrics, flat_bottom: usize) {
    info!(
        "{}: {} pings read, {} written, {} rejected, {} comments",
        input.display(),
        metrics.pings_read,
        metrics.pings_written,
        metrics.pings_rejected,
        metrics.comments
    );
    if let Some(edits) = metrics.edits {
        info!(
            "{}: edits used {} unused {} duplicate {} tied to null {}; {} reverse edits",
            input.display(),
            edits.used,
            edits.unused,
            edits.duplicate,
            edits.tied_to_null,
            metrics.reverse_edits
        );
    }
    if flat_bottom > 0 {
        info!("{}: {} samples corrected against a flat bottom", input.display(), flat_bottom);
    }
    if metrics.pings_noted > 0 {
        info!("{}: {} pings processed with fallbacks", input.display(), metrics.pings_noted);
    }
}
