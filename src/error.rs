//! Error types for sherlock-core.

use std::path::PathBuf;

use thiserror::Error;

/// Engine-level error.
///
/// A command that ran and exited nonzero is not an error; it is reported
/// through [`crate::exec::ExecutionResult::exit_code`].
#[derive(Debug, Error)]
pub enum Error {
    /// Nothing to authenticate with: no key, no agent identity, no password.
    #[error("no authentication method available (configure a password, an identity file, or an SSH agent)")]
    NoAuthMethods,

    /// An explicitly configured identity file could not be used.
    #[error("{reason} ({})", path.display())]
    Key { path: PathBuf, reason: String },

    /// The user's home directory could not be determined.
    #[error("cannot determine home directory")]
    HomeDir,

    /// Dial, handshake, host key rejection, or every auth method rejected.
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// The established transport failed, e.g. while disconnecting.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote operation attempted without a live connection.
    #[error("not connected")]
    NotConnected,

    /// Channel open, exec, or PTY request failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// The local process could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Terminal type contains characters outside `[A-Za-z0-9_-]`.
    #[error("invalid terminal type: {0:?}")]
    InvalidTermType(String),

    /// Another interactive command already owns the local terminal.
    #[error("terminal is already in use by another interactive command")]
    TerminalBusy,

    /// Reading or changing terminal attributes failed.
    #[error("terminal error: {0}")]
    Terminal(#[source] std::io::Error),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true for errors caused by configuration rather than the network.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::NoAuthMethods | Error::Key { .. } | Error::HomeDir | Error::InvalidTermType(_)
        )
    }

    pub(crate) fn key(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Key {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
