use std::env;
use std::fs;
use time::macros::format_description;
use time::OffsetDateTime;

/// Who is writing a file: recorded in edit-file headers and lock files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub program: String,
    pub version: String,
    pub user: String,
    pub host: String,
}

impl Identity {
    pub fn current(program: &str, version: &str) -> Self {
        let user = env::var("USER")
            .or_else(|_| env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host = env::var("HOSTNAME")
            .ok()
            .or_else(|| {
                fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|name| name.trim().to_string())
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            program: program.to_string(),
            version: version.to_string(),
            user,
            host,
        }
    }

    /// Current UTC time as `yyyy/mm/dd hh:mm:ss`.
    pub fn timestamp(&self) -> String {
        let format = format_description!("[year]/[month]/[day] [hour]:[minute]:[second]");
        OffsetDateTime::now_utc()
            .format(&format)
            .unwrap_or_else(|_| String::from("unknown"))
    }
}
