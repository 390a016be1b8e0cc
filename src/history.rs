//! Login history: which targets were reached and when, persisted as JSON.
//!
//! The engine never writes here on its own; callers record a login after
//! a successful [`crate::RemoteSession::connect`].

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::ssh::HostInfo;

/// One remembered target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub timestamp: DateTime<Local>,
    /// Our public key was installed on the target.
    #[serde(default)]
    pub has_pub_key: bool,
}

impl Record {
    /// `user@host:port`, unique per target.
    pub fn host_key(&self) -> String {
        host_key(&self.host, self.port, &self.user)
    }

    pub fn host_info(&self) -> HostInfo {
        HostInfo::new(self.host.clone(), self.port, self.user.clone())
    }
}

fn host_key(host: &str, port: u16, user: &str) -> String {
    format!("{}@{}:{}", user, host, port)
}

/// `~/.config/sherlock/history.json`
pub fn default_history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("sherlock").join("history.json"))
}

/// File-backed history. Every mutation is written through immediately.
#[derive(Debug)]
pub struct History {
    path: PathBuf,
    records: Vec<Record>,
}

impl History {
    /// Load the history at `path`. A missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("failed to parse history {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to load history {}", path.display()))
            }
        };
        Ok(Self { path, records })
    }

    /// [`History::open`] at [`default_history_path`].
    pub fn open_default() -> Result<Self> {
        let path = default_history_path().context("cannot determine home directory")?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a login now. An existing entry for the same target gets the
    /// new timestamp; `has_pub_key` only ever goes from false to true.
    pub fn add_record(
        &mut self,
        host: &str,
        port: u16,
        user: &str,
        has_pub_key: bool,
    ) -> Result<()> {
        let now = Local::now();
        let key = host_key(host, port, user);

        match self.records.iter_mut().find(|r| r.host_key() == key) {
            Some(existing) => {
                existing.timestamp = now;
                existing.has_pub_key |= has_pub_key;
            }
            None => self.records.push(Record {
                host: host.to_string(),
                port,
                user: user.to_string(),
                timestamp: now,
                has_pub_key,
            }),
        }
        self.save()
    }

    /// Flag a known target as having our public key. Unknown targets are
    /// left alone.
    pub fn mark_pub_key_added(&mut self, host: &str, port: u16, user: &str) -> Result<()> {
        let key = host_key(host, port, user);
        match self.records.iter_mut().find(|r| r.host_key() == key) {
            Some(record) => {
                record.has_pub_key = true;
                self.save()
            }
            None => Ok(()),
        }
    }

    pub fn has_pub_key(&self, host: &str, port: u16, user: &str) -> bool {
        let key = host_key(host, port, user);
        self.records
            .iter()
            .find(|r| r.host_key() == key)
            .is_some_and(|r| r.has_pub_key)
    }

    /// All records, newest first.
    pub fn records(&self) -> Vec<Record> {
        let mut records = self.records.clone();
        sort_newest_first(&mut records);
        records
    }

    /// At most `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<Record> {
        let mut records = self.records();
        records.truncate(n);
        records
    }

    /// Records whose host, user, or `user@host:port` contains `query`,
    /// ignoring case. Newest first.
    pub fn search(&self, query: &str) -> Vec<Record> {
        let query = query.to_lowercase();
        let mut results: Vec<Record> = self
            .records
            .iter()
            .filter(|r| {
                r.host.to_lowercase().contains(&query)
                    || r.user.to_lowercase().contains(&query)
                    || r.host_key().to_lowercase().contains(&query)
            })
            .cloned()
            .collect();
        sort_newest_first(&mut results);
        results
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let data = serde_json::to_string_pretty(&self.records)
            .context("failed to serialize history")?;

        // mode() only applies when the file is created
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", self.path.display()))?;
        file.write_all(data.as_bytes())
            .with_context(|| format!("failed to write {}", self.path.display()))?;

        log::debug!("saved {} history records to {}", self.records.len(), self.path.display());
        Ok(())
    }
}

fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Human-readable listing of `records`, in the order given.
pub fn format_records(records: &[Record]) -> String {
    if records.is_empty() {
        return "No login history found.".to_string();
    }

    let mut out = String::from("Login History:\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for (i, r) in records.iter().enumerate() {
        let marker = if r.has_pub_key { " [key]" } else { "" };
        out.push_str(&format!(
            "{:2}. {}{}\n    Last login: {}\n",
            i + 1,
            r.host_key(),
            marker,
            r.timestamp.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    out
}
