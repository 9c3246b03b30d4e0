use crate::edit::EditSummary;
use std::sync::Mutex;

/// Per-file counters reported when a file task finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetrics {
    pub pings_read: usize,
    pub pings_written: usize,
    pub pings_rejected: usize,
    pub comments: usize,
    pub beams_nulled: usize,
    /// Pings for which some stage fell back or skipped work.
    pub pings_noted: usize,
    pub reverse_edits: usize,
    pub edits: Option<EditSummary>,
}

/// Run-wide counters shared by concurrent file tasks.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Default)]
struct Metrics {
    files: usize,
    pings: usize,
    rejected: usize,
    errors: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_file(&self, file: &FileMetrics) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.files += 1;
            metrics.pings += file.pings_written;
            metrics.rejected += file.pings_rejected;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    /// (files, pings written, pings rejected, failed files)
    pub fn snapshot(&self) -> (usize, usize, usize, usize) {
        if let Ok(metrics) = self.inner.lock() {
            (metrics.files, metrics.pings, metrics.rejected, metrics.errors)
        } else {
            (0, 0, 0, 0)
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
