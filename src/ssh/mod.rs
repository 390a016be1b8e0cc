pub mod auth;
pub mod known_hosts;
pub mod session;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use known_hosts::HostKeyPolicy;
pub use session::RemoteSession;

/// Default dial + handshake + authentication timeout, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Remote endpoint: who to log in as, where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
}

fn default_port() -> u16 {
    22
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }
}

/// `user@host:port`
impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// What the auth chain may use. None of these is required; the resolver
/// decides which are attempted and in what order.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// Terminal type for interactive commands; `$TERM` when unset.
    pub term_type: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("term_type", &self.term_type)
            .finish()
    }
}

/// SSH connection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(flatten)]
    pub host: HostInfo,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: HostInfo::new("localhost", 22, "root"),
            credentials: Credentials::default(),
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl SshConfig {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: HostInfo::new(host, port, user),
            ..Default::default()
        }
    }

    /// Parse a JSON document such as
    /// `{"host": "example.com", "user": "deploy", "key_path": "~/.ssh/deploy"}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials.password = Some(password.into());
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.credentials.key_path = Some(path.into());
        self.credentials.passphrase = passphrase;
        self
    }

    pub fn with_term_type(mut self, term_type: impl Into<String>) -> Self {
        self.credentials.term_type = Some(term_type.into());
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        // zero would fail every attempt immediately
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
