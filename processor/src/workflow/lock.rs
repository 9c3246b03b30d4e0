use super::config::with_suffix;
use anyhow::Context;
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use swathcore::telemetry::Identity;

pub const PURPOSE_ID: u32 = 1;
pub const PURPOSE: &str = "Swath file processing";

/// Contents of an advisory lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub file: String,
    pub program: String,
    pub user: String,
    pub host: String,
    pub date: String,
    pub purpose_id: u32,
    pub purpose: String,
}

impl LockInfo {
    fn for_identity(input: &Path, identity: &Identity, date: &str) -> Self {
        Self {
            file: input.display().to_string(),
            program: identity.program.clone(),
            user: identity.user.clone(),
            host: identity.host.clone(),
            date: date.to_string(),
            purpose_id: PURPOSE_ID,
            purpose: PURPOSE.to_string(),
        }
    }

    /// Same program, user and purpose may release the lock.
    pub fn owned_by(&self, identity: &Identity) -> bool {
        self.program == identity.program
            && self.user == identity.user
            && self.purpose_id == PURPOSE_ID
    }

    pub fn owner(&self) -> String {
        format!("{} by {} on {} at {}", self.program, self.user, self.host, self.date)
    }

    fn render(&self) -> String {
        format!(
            "# File locked\nFile: {}\nProgram: {}\nUser: {}\nCPU: {}\nDate: {}\nPurpose ID: {}\nPurpose: {}\n",
            self.file, self.program, self.user, self.host, self.date, self.purpose_id, self.purpose
        )
    }

    fn parse(text: &str) -> Self {
        let mut info = LockInfo {
            file: String::new(),
            program: String::new(),
            user: String::new(),
            host: String::new(),
            date: String::new(),
            purpose_id: 0,
            purpose: String::new(),
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "File" => info.file = value,
                "Program" => info.program = value,
                "User" => info.user = value,
                "CPU" => info.host = value,
                "Date" => info.date = value,
                "Purpose ID" => info.purpose_id = value.parse().unwrap_or(0),
                "Purpose" => info.purpose = value,
                _ => {}
            }
        }
        info
    }
}

/// `<input>.lck`
pub fn lock_path(input: &Path) -> PathBuf {
    with_suffix(input, "lck")
}

/// Current holder of the lock on `input`, if any.
pub fn read_lock(input: &Path) -> Option<LockInfo> {
    fs::read_to_string(lock_path(input))
        .ok()
        .map(|text| LockInfo::parse(&text))
}

pub enum LockStatus {
    Acquired(FileLock),
    Held(LockInfo),
}

/// Held advisory lock; released on drop if not released explicitly.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    identity: Identity,
    released: bool,
}

impl FileLock {
    pub fn acquire(input: &Path, identity: &Identity, date: &str) -> anyhow::Result<LockStatus> {
        let path = lock_path(input);
        let info = LockInfo::for_identity(input, identity, date);
        let created = OpenOptions::new().write(true).create_new(true).open(&path);
        let mut file = match created {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = read_lock(input).unwrap_or_else(|| LockInfo::parse(""));
                debug!("{} locked by {}", input.display(), holder.owner());
                return Ok(LockStatus::Held(holder));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("creating lock {}", path.display()))
            }
        };
        file.write_all(info.render().as_bytes())
            .with_context(|| format!("writing lock {}", path.display()))?;
        debug!("locked {}", input.display());
        Ok(LockStatus::Acquired(FileLock {
            path,
            identity: identity.clone(),
            released: false,
        }))
    }

    /// Removes the lock file if it still names this owner.
    pub fn release(mut self) -> anyhow::Result<()> {
        self.released = true;
        self.remove()
    }

    fn remove(&self) -> anyhow::Result<()> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading lock {}", self.path.display()))
            }
        };
        let holder = LockInfo::parse(&text);
        if !holder.owned_by(&self.identity) {
            warn!("lock {} now held by {}", self.path.display(), holder.owner());
            return Ok(());
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("removing lock {}", self.path.display()))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.remove() {
                warn!("{:#}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn identity(user: &str) -> Identity {
        Identity {
            program: "swathproc".into(),
            version: "0.1.0".into(),
            user: user.into(),
            host: "survey".into(),
        }
    }

    #[test]
    fn lock_is_exclusive_between_owners() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("line.jsonl");
        let ours = match FileLock::acquire(&input, &identity("alice"), "2004/01/01 00:00:00").unwrap() {
            LockStatus::Acquired(lock) => lock,
            LockStatus::Held(_) => panic!("fresh lock reported held"),
        };
        assert!(lock_path(&input).exists());

        match FileLock::acquire(&input, &identity("bob"), "2004/01/01 00:00:01").unwrap() {
            LockStatus::Held(info) => {
                assert_eq!(info.user, "alice");
                assert_eq!(info.purpose_id, PURPOSE_ID);
                assert!(info.owner().contains("alice"));
            }
            LockStatus::Acquired(_) => panic!("second owner acquired the lock"),
        }
        ours.release().unwrap();
        assert!(!lock_path(&input).exists());
    }

    #[test]
    fn only_the_owner_removes_the_lock() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("line.jsonl");
        let lock = match FileLock::acquire(&input, &identity("alice"), "now").unwrap() {
            LockStatus::Acquired(lock) => lock,
            LockStatus::Held(_) => panic!("fresh lock reported held"),
        };
        let foreign = LockInfo::for_identity(&input, &identity("bob"), "later");
        fs::write(lock_path(&input), foreign.render()).unwrap();
        drop(lock);
        assert_eq!(read_lock(&input).unwrap().user, "bob");
    }

    #[test]
    fn existing_lock_of_same_user_is_held() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("line.jsonl");
        let running = LockInfo::for_identity(&input, &identity("alice"), "yesterday");
        fs::write(lock_path(&input), running.render()).unwrap();
        match FileLock::acquire(&input, &identity("alice"), "today").unwrap() {
            LockStatus::Held(info) => assert_eq!(info.date, "yesterday"),
            LockStatus::Acquired(_) => panic!("second run acquired a held lock"),
        }
        assert_eq!(read_lock(&input).unwrap().date, "yesterday");
    }
}
