use super::config::{default_output, load_parameters, parameter_path};
use super::lock::{read_lock, FileLock, LockStatus};
use super::runner::{FileTask, Runner};
use anyhow::Context;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;
use swathcore::config::ProcessConfig;
use swathcore::correction::{GridCache, TopoGrid};
use swathcore::telemetry::{FileMetrics, Identity, MetricsRecorder};

/// Grids kept resident across batches.
pub const GRID_CACHE_SIZE: usize = 4;
/// Grid requests a resident grid may sit out before it is dropped.
pub const GRID_IDLE_LIMIT: u64 = 10;

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub threads: usize,
    pub force: bool,
    pub strip_comments: bool,
    pub test_only: bool,
    /// Output override, honoured for single-file runs only.
    pub output: Option<PathBuf>,
}

/// Why a file was or was not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    OutOfDate,
    Overridden,
    UpToDate,
    Locked(String),
}

impl Decision {
    pub fn proceeds(&self) -> bool {
        matches!(self, Decision::OutOfDate | Decision::Overridden)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::OutOfDate => write!(f, "**: Data processed - out of date"),
            Decision::Overridden => write!(f, "**: Data processed - up to date but overridden"),
            Decision::UpToDate => write!(f, "--: Data not processed - up to date"),
            Decision::Locked(owner) => write!(f, "--: Data not processed - locked by {}", owner),
        }
    }
}

/// A file with its resolved parameters and processing decision.
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: ProcessConfig,
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub decision: Decision,
    pub metrics: Option<FileMetrics>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Compares output age against every input the run would read.
fn decide(plan_inputs: &[PathBuf], output: &Path, force: bool, locked: Option<String>) -> Decision {
    if let Some(owner) = locked {
        return Decision::Locked(owner);
    }
    let newest_input = plan_inputs.iter().filter_map(|path| modified(path)).max();
    let up_to_date = match (modified(output), newest_input) {
        (Some(output), Some(input)) => output >= input,
        (Some(_), None) => true,
        (None, _) => false,
    };
    match (up_to_date, force) {
        (false, _) => Decision::OutOfDate,
        (true, true) => Decision::Overridden,
        (true, false) => Decision::UpToDate,
    }
}

pub struct Orchestrator {
    options: Options,
    identity: Identity,
    date: String,
    cache: GridCache<TopoGrid>,
    metrics: Arc<MetricsRecorder>,
}

impl Orchestrator {
    pub fn new(options: Options) -> Self {
        let identity = Identity::current("swathproc", env!("CARGO_PKG_VERSION"));
        let date = identity.timestamp();
        Self {
            options,
            identity,
            date,
            cache: GridCache::new(GRID_CACHE_SIZE).with_idle_limit(GRID_IDLE_LIMIT),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    /// Pins the date written into outputs so repeated runs are reproducible.
    pub fn with_date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    pub fn width(&self) -> usize {
        let hardware = thread::available_parallelism().map_or(1, |n| n.get());
        self.options.threads.max(1).min(hardware)
    }

    pub fn plan(&self, input: &Path, single: bool) -> anyhow::Result<FilePlan> {
        if !input.exists() {
            anyhow::bail!("input file {} not found", input.display());
        }
        let parameters = parameter_path(input);
        let config = load_parameters(&parameters)?;
        let output = match (&self.options.output, single) {
            (Some(output), true) => output.clone(),
            _ => config.output.clone().unwrap_or_else(|| default_output(input)),
        };

        let mut inputs = vec![input.to_path_buf(), parameters.clone()];
        inputs.extend(config.input_dependencies());
        inputs.extend(config.topography_files());
        let locked = read_lock(input).map(|holder| holder.owner());
        let decision = decide(&inputs, &output, self.options.force, locked);
        debug!(
            "{} with {}: {:?}",
            input.display(),
            parameters.display(),
            decision
        );
        Ok(FilePlan {
            input: input.to_path_buf(),
            output,
            config,
            decision,
        })
    }

    /// Loads the grids a batch needs; the cache is never touched by workers.
    fn grids_for(&mut self, batch: &[FilePlan]) -> anyhow::Result<HashMap<PathBuf, Arc<TopoGrid>>> {
        let mut grids = HashMap::new();
        for plan in batch {
            for path in plan.config.topography_files() {
                if grids.contains_key(&path) {
                    continue;
                }
                let grid = self
                    .cache
                    .request(&path, |p| TopoGrid::load(p))
                    .with_context(|| format!("loading grid for {}", plan.input.display()))?;
                grids.insert(path, grid);
            }
        }
        Ok(grids)
    }

    fn task(&self, plan: &FilePlan, grids: &HashMap<PathBuf, Arc<TopoGrid>>) -> FileTask {
        let needed: HashMap<PathBuf, Arc<TopoGrid>> = plan
            .config
            .topography_files()
            .into_iter()
            .filter_map(|path| grids.get(&path).map(|grid| (path, Arc::clone(grid))))
            .collect();
        FileTask {
            input: plan.input.clone(),
            output: plan.output.clone(),
            config: plan.config.clone(),
            strip_comments: self.options.strip_comments,
            grids: needed,
            identity: self.identity.clone(),
            date: self.date.clone(),
        }
    }

    /// Plans every input, then processes eligible files in joined batches.
    pub fn run(&mut self, inputs: &[PathBuf]) -> anyhow::Result<Vec<FileReport>> {
        let single = inputs.len() == 1;
        let plans = inputs
            .iter()
            .map(|input| self.plan(input, single))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut reports = Vec::with_capacity(plans.len());
        let mut pending = Vec::new();
        for plan in plans {
            if self.options.test_only || !plan.decision.proceeds() {
                println!("{} {}", plan.input.display(), plan.decision);
                reports.push(FileReport {
                    input: plan.input,
                    output: plan.output,
                    decision: plan.decision,
                    metrics: None,
                });
            } else {
                pending.push(plan);
            }
        }
        if pending.is_empty() {
            return Ok(reports);
        }

        let width = self.width();
        info!("processing {} files, {} at a time", pending.len(), width);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(width)
            .max_blocking_threads(width)
            .build()
            .context("creating worker runtime")?;

        for batch in pending.chunks(width) {
            let grids = self.grids_for(batch)?;
            let tasks: Vec<FileTask> = batch.iter().map(|plan| self.task(plan, &grids)).collect();
            let results = runtime.block_on(async {
                let handles: Vec<_> = tasks
                    .into_iter()
                    .map(|task| tokio::task::spawn_blocking(move || run_locked(task)))
                    .collect();
                let mut results = Vec::with_capacity(handles.len());
                for handle in handles {
                    results.push(handle.await);
                }
                results
            });

            let mut failure = None;
            for (plan, joined) in batch.iter().zip(results) {
                let outcome = joined
                    .map_err(|err| anyhow::anyhow!("worker for {} panicked: {}", plan.input.display(), err))
                    .and_then(|result| result);
                match outcome {
                    Ok(Some(metrics)) => {
                        self.metrics.record_file(&metrics);
                        println!("{} {}", plan.input.display(), plan.decision);
                        reports.push(FileReport {
                            input: plan.input.clone(),
                            output: plan.output.clone(),
                            decision: plan.decision.clone(),
                            metrics: Some(metrics),
                        });
                    }
                    Ok(None) => {
                        let decision = Decision::Locked(
                            read_lock(&plan.input).map_or_else(|| "another process".into(), |h| h.owner()),
                        );
                        println!("{} {}", plan.input.display(), decision);
                        reports.push(FileReport {
                            input: plan.input.clone(),
                            output: plan.output.clone(),
                            decision,
                            metrics: None,
                        });
                    }
                    Err(err) => {
                        self.metrics.record_error();
                        warn!("{:#}", err);
                        failure.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }

        let (hits, misses) = self.cache.stats();
        if hits + misses > 0 {
            debug!("grid cache: {} hits, {} misses, {} evicted", hits, misses, self.cache.evicted().len());
        }
        Ok(reports)
    }
}

/// Runs one file under its advisory lock. `Ok(None)` when another owner holds it.
fn run_locked(task: FileTask) -> anyhow::Result<Option<FileMetrics>> {
    let lock = match FileLock::acquire(&task.input, &task.identity, &task.date)? {
        LockStatus::Acquired(lock) => lock,
        LockStatus::Held(holder) => {
            warn!("{} locked by {}", task.input.display(), holder.owner());
            return Ok(None);
        }
    };
    let result = Runner::new(task).execute();
    lock.release()?;
    result.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::survey::{generate, SurveyConfig};
    use crate::workflow::config::with_suffix;
    use crate::workflow::lock::lock_path;
    use crate::workflow::runner::SideOutputs;
    use tempfile::tempdir;

    fn survey(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let config = SurveyConfig {
                    name: format!("line{:04}", i + 1),
                    seed: i as u64,
                    ..SurveyConfig::default()
                };
                generate(dir, &config).unwrap().input
            })
            .collect()
    }

    fn options(threads: usize) -> Options {
        Options {
            threads,
            ..Options::default()
        }
    }

    fn outputs(inputs: &[PathBuf]) -> Vec<Vec<u8>> {
        let mut bytes = Vec::new();
        for input in inputs {
            let output = default_output(input);
            bytes.push(fs::read(&output).unwrap());
            let side = SideOutputs::for_output(&output);
            for path in [side.fnv, side.fbt, side.inf, side.resf] {
                bytes.push(fs::read(path).unwrap());
            }
        }
        bytes
    }

    #[test]
    fn batch_width_does_not_change_outputs() {
        let serial = tempdir().unwrap();
        let parallel = tempdir().unwrap();
        let serial_inputs = survey(serial.path(), 3);
        let parallel_inputs = survey(parallel.path(), 3);

        Orchestrator::new(options(1))
            .with_date("2004/01/01 00:00:00")
            .run(&serial_inputs)
            .unwrap();
        Orchestrator::new(options(4))
            .with_date("2004/01/01 00:00:00")
            .run(&parallel_inputs)
            .unwrap();

        let strip = |blobs: Vec<Vec<u8>>, dir: &Path| -> Vec<Vec<u8>> {
            let prefix = dir.display().to_string();
            blobs
                .into_iter()
                .map(|blob| String::from_utf8_lossy(&blob).replace(&prefix, "").into_bytes())
                .collect()
        };
        assert_eq!(
            strip(outputs(&serial_inputs), serial.path()),
            strip(outputs(&parallel_inputs), parallel.path())
        );
    }

    #[test]
    fn up_to_date_output_is_not_reprocessed() {
        let dir = tempdir().unwrap();
        let inputs = survey(dir.path(), 1);
        let reports = Orchestrator::new(options(1)).run(&inputs).unwrap();
        assert_eq!(reports[0].decision, Decision::OutOfDate);
        let resf = with_suffix(&default_output(&inputs[0]), "resf");
        let length = fs::metadata(&resf).unwrap().len();

        let reports = Orchestrator::new(options(1)).run(&inputs).unwrap();
        assert_eq!(reports[0].decision, Decision::UpToDate);
        assert!(reports[0].metrics.is_none());
        assert_eq!(fs::metadata(&resf).unwrap().len(), length);

        let forced = Options {
            force: true,
            ..options(1)
        };
        let reports = Orchestrator::new(forced).run(&inputs).unwrap();
        assert_eq!(reports[0].decision, Decision::Overridden);
        assert_eq!(reports[0].metrics.as_ref().unwrap().reverse_edits, 1);
        assert!(!lock_path(&inputs[0]).exists());
    }

    #[test]
    fn file_locked_by_another_owner_is_skipped() {
        let dir = tempdir().unwrap();
        let inputs = survey(dir.path(), 1);
        fs::write(
            lock_path(&inputs[0]),
            "File: x\nProgram: otherprog\nUser: someone\nCPU: elsewhere\nDate: today\nPurpose ID: 1\n",
        )
        .unwrap();
        let reports = Orchestrator::new(options(2)).run(&inputs).unwrap();
        match &reports[0].decision {
            Decision::Locked(owner) => assert!(owner.contains("otherprog")),
            other => panic!("unexpected decision {:?}", other),
        }
        assert!(!default_output(&inputs[0]).exists());
        assert!(lock_path(&inputs[0]).exists());
    }

    #[test]
    fn file_locked_by_same_user_is_skipped() {
        let dir = tempdir().unwrap();
        let inputs = survey(dir.path(), 1);
        let identity = Identity::current("swathproc", env!("CARGO_PKG_VERSION"));
        let held = format!(
            "File: {}\nProgram: {}\nUser: {}\nCPU: {}\nDate: earlier\nPurpose ID: 1\n",
            inputs[0].display(),
            identity.program,
            identity.user,
            identity.host
        );
        fs::write(lock_path(&inputs[0]), &held).unwrap();
        let reports = Orchestrator::new(options(1)).run(&inputs).unwrap();
        assert!(matches!(reports[0].decision, Decision::Locked(_)));
        assert!(reports[0].metrics.is_none());
        assert!(!default_output(&inputs[0]).exists());
        assert_eq!(fs::read_to_string(lock_path(&inputs[0])).unwrap(), held);
    }

    #[test]
    fn test_mode_reports_without_processing() {
        let dir = tempdir().unwrap();
        let inputs = survey(dir.path(), 2);
        let test_only = Options {
            test_only: true,
            ..options(1)
        };
        let reports = Orchestrator::new(test_only).run(&inputs).unwrap();
        assert!(reports.iter().all(|r| r.decision == Decision::OutOfDate && r.metrics.is_none()));
        assert!(!default_output(&inputs[0]).exists());
        assert_eq!(
            Decision::OutOfDate.to_string(),
            "**: Data processed - out of date"
        );
    }

    #[test]
    fn missing_parameter_file_is_fatal() {
        let dir = tempdir().unwrap();
        let inputs = survey(dir.path(), 1);
        fs::remove_file(parameter_path(&inputs[0])).unwrap();
        let err = Orchestrator::new(options(1)).run(&inputs).unwrap_err();
        assert!(format!("{:#}", err).contains("parameter file"));
    }

    #[test]
    fn newer_dependency_marks_output_stale() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a");
        let output = dir.path().join("b");
        fs::write(&input, "").unwrap();
        fs::write(&output, "").unwrap();
        let newer = SystemTime::now() + std::time::Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&input)
            .unwrap()
            .set_modified(newer)
            .unwrap();
        assert_eq!(decide(&[input.clone()], &output, false, None), Decision::OutOfDate);
        assert_eq!(decide(&[], &output, false, None), Decision::UpToDate);
        assert_eq!(decide(&[input], &output, false, Some("x".into())), Decision::Locked("x".into()));
    }
}
