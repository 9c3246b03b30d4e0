use anyhow::Context;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use swathcore::config::ProcessConfig;

/// `<input>.par`
pub fn parameter_path(input: &Path) -> PathBuf {
    with_suffix(input, "par")
}

/// Appends `.suffix` to the full file name, keeping any existing extension.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Default processed-file name: `line.jsonl` becomes `linep.jsonl`.
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}p.{}", stem, ext.to_string_lossy()),
        None => format!("{}p", stem),
    };
    input.with_file_name(name)
}

/// Reads a YAML parameter file. Relative paths inside it are taken
/// relative to the parameter file's directory.
pub fn load_parameters<P: AsRef<Path>>(path: P) -> anyhow::Result<ProcessConfig> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref)
        .with_context(|| format!("reading parameter file {}", path_ref.display()))?;
    let mut config: ProcessConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing parameter file {}", path_ref.display()))?;
    if let Some(base) = path_ref.parent() {
        resolve_paths(&mut config, base);
    }
    Ok(config)
}

fn resolve_paths(config: &mut ProcessConfig, base: &Path) {
    let resolve = |file: &mut Option<PathBuf>| {
        if let Some(path) = file.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    };
    resolve(&mut config.output);
    resolve(&mut config.nav.file);
    resolve(&mut config.nav_adjust.file);
    resolve(&mut config.attitude.file);
    resolve(&mut config.sensordepth.file);
    resolve(&mut config.tide.file);
    resolve(&mut config.svp.file);
    resolve(&mut config.static_correction.file);
    resolve(&mut config.amplitude.file);
    resolve(&mut config.amplitude.topography_file);
    resolve(&mut config.sidescan.file);
    resolve(&mut config.sidescan.topography_file);
    resolve(&mut config.edit.file);
}

/// Input files named one per line; blank lines and `#` comments skipped.
pub fn read_file_list<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<PathBuf>> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref)
        .with_context(|| format!("reading file list {}", path_ref.display()))?;
    let base = path_ref.parent().unwrap_or_else(|| Path::new(""));
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(|entry| {
            let path = PathBuf::from(entry);
            if path.is_relative() {
                base.join(path)
            } else {
                path
            }
        })
        .collect())
}
