use crate::prelude::{StageError, StageResult};
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Entry<T> {
    value: Arc<T>,
    /// Requests served by other entries since this one was last used.
    idle: u64,
}

/// Bounded set of shared read-only resources keyed by path.
///
/// Every request resets the requested entry's idle count and increments all
/// others; a miss on a full cache evicts the entry with the largest count,
/// and entries idle for longer than the idle limit are dropped outright.
/// Only the owner mutates the cache; tasks receive `Arc` clones.
pub struct GridCache<T> {
    capacity: usize,
    idle_limit: u64,
    entries: HashMap<PathBuf, Entry<T>>,
    hits: u64,
    misses: u64,
    evicted: Vec<PathBuf>,
}

impl<T> GridCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            idle_limit: u64::MAX,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evicted: Vec::new(),
        }
    }

    pub fn with_idle_limit(mut self, idle_limit: u64) -> Self {
        self.idle_limit = idle_limit;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Paths evicted so far, oldest first.
    pub fn evicted(&self) -> &[PathBuf] {
        &self.evicted
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Returns the resident value for `path`, loading it on a miss.
    pub fn request<F>(&mut self, path: &Path, load: F) -> StageResult<Arc<T>>
    where
        F: FnOnce(&Path) -> StageResult<T>,
    {
        let loaded = if self.entries.contains_key(path) {
            None
        } else {
            Some(Arc::new(load(path)?))
        };

        for (key, entry) in self.entries.iter_mut() {
            if key.as_path() == path {
                entry.idle = 0;
            } else {
                entry.idle += 1;
            }
        }
        self.age_out();

        match loaded {
            Some(value) => {
                self.misses += 1;
                if self.entries.len() >= self.capacity {
                    self.evict();
                }
                info!("loaded grid {}", path.display());
                self.entries.insert(
                    path.to_path_buf(),
                    Entry {
                        value: Arc::clone(&value),
                        idle: 0,
                    },
                );
                Ok(value)
            }
            None => {
                self.hits += 1;
                self.entries
                    .get(path)
                    .map(|entry| Arc::clone(&entry.value))
                    .ok_or_else(|| StageError::Internal(format!("grid {} not resident", path.display())))
            }
        }
    }

    fn age_out(&mut self) {
        let limit = self.idle_limit;
        let mut stale: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.idle > limit)
            .map(|(key, _)| key.clone())
            .collect();
        stale.sort();
        for key in stale {
            debug!("dropping unused grid {}", key.display());
            self.entries.remove(&key);
            self.evicted.push(key);
        }
    }

    fn evict(&mut self) {
        let victim = self
            .entries
            .iter()
            .max_by(|a, b| a.1.idle.cmp(&b.1.idle).then_with(|| b.0.cmp(a.0)))
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            debug!("evicting grid {}", key.display());
            self.entries.remove(&key);
            self.evicted.push(key);
        }
    }
}
