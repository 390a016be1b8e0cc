//! Sherlock Core — command execution engine for Sherlock
//!
//! Runs shell commands on a remote host over SSH or on the local machine
//! behind one async contract, either with captured output or attached to
//! the local terminal through a PTY.

pub mod error;
pub mod exec;
pub mod history;
pub mod interactive;
pub mod local;
pub mod logging;
pub mod ssh;
pub mod terminal;

pub use error::{Error, Result};
pub use exec::{ExecutionResult, Executor, RunOutcome};
pub use interactive::is_interactive_command;
pub use local::LocalSession;
pub use ssh::{Credentials, HostInfo, HostKeyPolicy, RemoteSession, SshConfig};
pub use terminal::is_valid_term_type;
