use super::auth::{self, AuthPlan};
use super::known_hosts::ClientHandler;
use super::{HostInfo, SshConfig};
use crate::error::{Error, Result};
use crate::exec::{ExecutionResult, Executor};
use crate::terminal::{self, RawModeGuard};
use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use std::io::Write;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the stdin relay thread checks whether it should stop.
const STDIN_POLL_INTERVAL_MS: libc::c_int = 100;

/// SSH session against a single target.
///
/// Each command gets its own exec channel, so remote shell state such as
/// the working directory does not carry over between commands.
pub struct RemoteSession {
    config: SshConfig,
    handle: Option<client::Handle<ClientHandler>>,
}

impl RemoteSession {
    /// Check that `config` can authenticate at all, without dialing.
    ///
    /// Fails with [`Error::NoAuthMethods`] when there is nothing to try, and
    /// with [`Error::Key`] when an explicit identity file is unusable. The
    /// methods found here are dropped; [`RemoteSession::connect`] resolves
    /// them again.
    pub async fn new(config: SshConfig) -> Result<Self> {
        let plan = auth::resolve(&config).await?;
        if plan.is_empty() {
            return Err(Error::NoAuthMethods);
        }
        log::debug!("auth available for {}: {}", config.host, plan.summary());
        Ok(Self {
            config,
            handle: None,
        })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn host_info(&self) -> &HostInfo {
        &self.config.host
    }

    /// Establish and authenticate the SSH connection.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let plan = auth::resolve(&self.config).await?;
        if plan.is_empty() {
            return Err(Error::NoAuthMethods);
        }

        let target = self.config.host.to_string();
        let timeout = self.config.connect_timeout();
        let handle = match tokio::time::timeout(timeout, self.dial(plan)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(Error::Connect {
                    target,
                    reason: format!("{e:#}"),
                })
            }
            Err(_) => {
                return Err(Error::Connect {
                    target,
                    reason: format!("timed out after {timeout:?}"),
                })
            }
        };

        self.handle = Some(handle);
        log::info!("SSH connected to {}", target);
        Ok(())
    }

    async fn dial(&self, plan: AuthPlan) -> anyhow::Result<client::Handle<ClientHandler>> {
        let host = &self.config.host;
        let ssh_config = client::Config::default();
        let handler = ClientHandler::new(&host.host, host.port, self.config.host_key_policy);

        let mut handle = client::connect(
            Arc::new(ssh_config),
            (host.host.as_str(), host.port),
            handler,
        )
        .await?;

        auth::authenticate(&mut handle, &host.user, plan).await?;
        Ok(handle)
    }

    /// Disconnect the SSH session. Does nothing when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.is_closed() {
            return Ok(());
        }
        handle
            .disconnect(Disconnect::ByApplication, "User disconnect", "en")
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        log::info!("SSH disconnected from {}", self.config.host);
        Ok(())
    }

    async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        let handle = self.handle.as_ref().ok_or(Error::NotConnected)?;
        handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open session channel: {e}")))
    }
}

/// Wait for the server's answer to a request sent with `want_reply`.
async fn wait_for_reply(channel: &mut Channel<client::Msg>, request: &str) -> Result<()> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(Error::Channel(format!("{request} refused by server")))
            }
            Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => {
                return Err(Error::Channel(format!("channel closed before {request} reply")))
            }
            Some(_) => {}
        }
    }
}

/// Shell-style number for a remote signal name.
fn signal_number(sig: &Sig) -> i32 {
    match sig {
        Sig::HUP => libc::SIGHUP,
        Sig::INT => libc::SIGINT,
        Sig::QUIT => libc::SIGQUIT,
        Sig::ILL => libc::SIGILL,
        Sig::ABRT => libc::SIGABRT,
        Sig::FPE => libc::SIGFPE,
        Sig::KILL => libc::SIGKILL,
        Sig::SEGV => libc::SIGSEGV,
        Sig::PIPE => libc::SIGPIPE,
        Sig::ALRM => libc::SIGALRM,
        Sig::TERM => libc::SIGTERM,
        _ => 0,
    }
}

/// Relay raw stdin bytes into `tx` until `stop` fires, stdin hits EOF, or
/// the receiver goes away. Polls so that `stop` is noticed promptly.
fn spawn_stdin_reader(tx: mpsc::Sender<Vec<u8>>, stop: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        while !stop.is_cancelled() {
            let mut pollfd = libc::pollfd {
                fd: libc::STDIN_FILENO,
                events: libc::POLLIN,
                revents: 0,
            };
            let ready = unsafe { libc::poll(&mut pollfd, 1, STDIN_POLL_INTERVAL_MS) };
            if ready == 0 {
                continue;
            }
            if ready < 0 {
                if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                break;
            }

            let n = unsafe {
                libc::read(
                    libc::STDIN_FILENO,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n == 0 {
                break;
            }
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                ) {
                    continue;
                }
                log::debug!("stdin relay stopped: {}", err);
                break;
            }
            if tx.blocking_send(buf[..n as usize].to_vec()).is_err() {
                break;
            }
        }
    })
}

async fn next_resize(resize: &mut Option<Signal>) -> Option<()> {
    match resize {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

/// Pump bytes between the local terminal and `channel` until the remote
/// side closes or `cancel` fires.
async fn relay(channel: &mut Channel<client::Msg>, cancel: &CancellationToken) -> Result<()> {
    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
    let stop = CancellationToken::new();
    let reader = spawn_stdin_reader(input_tx, stop.clone());
    let mut resize = signal(SignalKind::window_change()).ok();
    let mut stdin_open = true;

    let result = loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    let mut stdout = std::io::stdout();
                    if let Err(e) = stdout.write_all(&data).and_then(|_| stdout.flush()) {
                        break Err(Error::Io(e));
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    let mut stderr = std::io::stderr();
                    if let Err(e) = stderr.write_all(&data).and_then(|_| stderr.flush()) {
                        break Err(Error::Io(e));
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    log::debug!("remote command exited with {}", exit_status);
                }
                Some(ChannelMsg::Close) | None => break Ok(()),
                Some(_) => {}
            },
            input = input_rx.recv(), if stdin_open => match input {
                Some(bytes) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        break Err(Error::Channel(format!("failed to send input: {e}")));
                    }
                }
                None => {
                    stdin_open = false;
                    let _ = channel.eof().await;
                }
            },
            resized = next_resize(&mut resize) => match resized {
                Some(()) => {
                    let (cols, rows) = terminal::terminal_size();
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        log::warn!("failed to forward window size: {}", e);
                    }
                }
                None => resize = None,
            },
            _ = cancel.cancelled() => {
                let _ = channel.close().await;
                break Err(Error::Cancelled);
            }
        }
    };

    stop.cancel();
    let _ = reader.await;
    result
}

#[async_trait]
impl Executor for RemoteSession {
    async fn execute(&mut self, cancel: &CancellationToken, command: &str) -> ExecutionResult {
        if cancel.is_cancelled() {
            return ExecutionResult::failed(Error::Cancelled);
        }
        let mut channel = match self.open_channel().await {
            Ok(channel) => channel,
            Err(e) => return ExecutionResult::failed(e),
        };
        if let Err(e) = channel.exec(true, command).await {
            return ExecutionResult::failed(Error::Channel(format!("exec failed: {e}")));
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        loop {
            tokio::select! {
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        stderr.extend_from_slice(&data)
                    }
                    // ExitStatus may arrive before the last Data, keep reading
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status as i32);
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        exit_code = Some(128 + signal_number(&signal_name));
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = cancel.cancelled() => {
                    log::debug!("cancelling {:?} on {}", command, self.config.host);
                    let _ = channel.close().await;
                    return ExecutionResult::failed(Error::Cancelled);
                }
            }
        }

        match exit_code {
            Some(exit_code) => ExecutionResult {
                stdout,
                stderr,
                exit_code,
                error: None,
            },
            None => ExecutionResult {
                stdout,
                stderr,
                exit_code: -1,
                error: Some(Error::Channel(
                    "channel closed without an exit status".to_string(),
                )),
            },
        }
    }

    async fn execute_interactive(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<()> {
        let term = terminal::resolve_term_type(self.config.credentials.term_type.as_deref())?;
        let mut channel = self.open_channel().await?;

        let (cols, rows) = terminal::terminal_size();
        channel
            .request_pty(true, &term, cols, rows, 0, 0, &[])
            .await
            .map_err(|e| Error::Channel(format!("PTY request failed: {e}")))?;
        wait_for_reply(&mut channel, "PTY request").await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("exec failed: {e}")))?;

        let _raw = if terminal::is_terminal(libc::STDIN_FILENO) {
            match RawModeGuard::stdin() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    let _ = channel.close().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        relay(&mut channel, cancel).await
    }

    fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_closed())
    }

    async fn close(&mut self) -> Result<()> {
        self.disconnect().await
    }

    fn host_info_string(&self) -> String {
        self.config.host.to_string()
    }
}
