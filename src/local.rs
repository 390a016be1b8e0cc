//! Local command execution with the same contract as the SSH backend.
//!
//! Each command runs in a fresh `sh -c`, so a `cd` inside one command would
//! be lost before the next. `cd` is therefore interpreted here and the
//! resulting directory is tracked on the session.

use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::exec::{ExecutionResult, Executor};
use crate::terminal::{self, ForegroundGuard, RawModeGuard};

const SHELL: &str = "sh";

/// How long to wait for output readers after a cancelled process is killed.
const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Executes commands on the local machine.
#[derive(Debug, Clone)]
pub struct LocalSession {
    hostname: String,
    username: String,
    cwd: PathBuf,
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSession {
    /// Create a session rooted at the process's current directory.
    pub fn new() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::with_cwd(cwd)
    }

    /// Create a session rooted at `cwd`.
    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            hostname: local_hostname().unwrap_or_else(|| "localhost".to_string()),
            username,
            cwd: cwd.into(),
        }
    }

    /// The tracked working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn shell_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(command).current_dir(&self.cwd);
        cmd
    }

    /// Interpret a `cd` command against the tracked directory.
    fn change_dir(&mut self, command: &str) -> ExecutionResult {
        let arg = command.strip_prefix("cd").unwrap_or(command).trim();

        let target = if arg.is_empty() || arg == "~" {
            match dirs::home_dir() {
                Some(home) => home,
                None => return ExecutionResult::failed(Error::HomeDir),
            }
        } else if let Some(rest) = arg.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => return ExecutionResult::failed(Error::HomeDir),
            }
        } else {
            // join() keeps absolute arguments as they are
            self.cwd.join(arg)
        };
        let target = clean_path(&target);

        match std::fs::metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                log::debug!("cwd {} -> {}", self.cwd.display(), target.display());
                self.cwd = target;
                ExecutionResult::default()
            }
            Ok(_) => not_a_directory(&target),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ExecutionResult::with_stderr(
                format!("cd: {}: No such file or directory\n", target.display()),
                1,
            ),
            Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) => not_a_directory(&target),
            Err(e) => ExecutionResult::failed(Error::Io(e)),
        }
    }
}

fn not_a_directory(target: &Path) -> ExecutionResult {
    ExecutionResult::with_stderr(format!("cd: {}: Not a directory\n", target.display()), 1)
}

fn is_cd_command(command: &str) -> bool {
    command
        .strip_prefix("cd")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// Lexically normalize a path: drop `.`, resolve `..` against the preceding
/// component. Symlinks are not consulted.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

fn local_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let result = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if result != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    (!name.is_empty()).then_some(name)
}

/// Exit code of a finished process; death by signal maps to `128 + signo`
/// the way shells report it.
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(-1)
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        // bytes read before an error stay in buf
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// Kill the whole process group so grandchildren holding the output pipes
/// go away too.
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[async_trait]
impl Executor for LocalSession {
    async fn execute(&mut self, cancel: &CancellationToken, command: &str) -> ExecutionResult {
        let command = command.trim();
        if is_cd_command(command) {
            return self.change_dir(command);
        }
        if cancel.is_cancelled() {
            return ExecutionResult::failed(Error::Cancelled);
        }

        let mut cmd = self.shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return ExecutionResult::failed(Error::Spawn {
                    command: command.to_string(),
                    source,
                })
            }
        };
        let pid = child.id();
        log::debug!("spawned {:?} as pid {:?} in {}", command, pid, self.cwd.display());

        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let run = async {
            let status = child.wait().await;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            (status, stdout, stderr)
        };
        tokio::pin!(run);

        tokio::select! {
            (status, stdout, stderr) = &mut run => match status {
                Ok(status) => ExecutionResult {
                    stdout,
                    stderr,
                    exit_code: exit_code(status),
                    error: None,
                },
                Err(e) => ExecutionResult {
                    stdout,
                    stderr,
                    exit_code: -1,
                    error: Some(Error::Io(e)),
                },
            },
            _ = cancel.cancelled() => {
                log::debug!("cancelling pid {:?}", pid);
                kill_process_group(pid);
                match tokio::time::timeout(CANCEL_DRAIN_TIMEOUT, &mut run).await {
                    Ok((_, stdout, stderr)) => ExecutionResult {
                        stdout,
                        stderr,
                        exit_code: -1,
                        error: Some(Error::Cancelled),
                    },
                    Err(_) => ExecutionResult::failed(Error::Cancelled),
                }
            }
        }
    }

    async fn execute_interactive(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<(), Error> {
        let on_terminal = terminal::is_terminal(libc::STDIN_FILENO);

        let mut cmd = self.shell_command(command);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true);
        if on_terminal {
            // The child claims the terminal itself as well, so it never
            // reads before the parent's handoff lands.
            unsafe {
                cmd.pre_exec(|| {
                    let _ = terminal::set_foreground(libc::STDIN_FILENO, libc::getpgrp());
                    Ok(())
                });
            }
        }

        let _raw = if on_terminal {
            match RawModeGuard::stdin() {
                Ok(guard) => Some(guard),
                Err(Error::TerminalBusy) => return Err(Error::TerminalBusy),
                Err(e) => {
                    log::warn!("running {:?} without raw mode: {}", command, e);
                    None
                }
            }
        } else {
            None
        };

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;
        let pid = child.id();

        // declared after the raw guard so the terminal is reclaimed first
        let _foreground = match pid {
            Some(pid) if on_terminal => {
                match ForegroundGuard::hand_to(libc::STDIN_FILENO, pid as libc::pid_t) {
                    Ok(guard) => Some(guard),
                    Err(e) => {
                        log::warn!("{:?} runs without the terminal foreground: {}", command, e);
                        None
                    }
                }
            }
            _ => None,
        };

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if !status.success() {
                    log::debug!("{:?} exited with {}", command, exit_code(status));
                }
                Ok(())
            }
            _ = cancel.cancelled() => {
                log::debug!("cancelling interactive pid {:?}", pid);
                kill_process_group(pid);
                let _ = child.wait().await;
                Err(Error::Cancelled)
            }
        }
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn host_info_string(&self) -> String {
        format!("{}@{}:local", self.username, self.hostname)
    }
}
