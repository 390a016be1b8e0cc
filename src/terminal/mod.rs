pub mod raw;

use std::os::fd::RawFd;

use crate::error::{Error, Result};

pub use raw::RawModeGuard;

/// Terminal type used when neither the configuration nor `$TERM` provides one.
pub const DEFAULT_TERM_TYPE: &str = "xterm-256color";

/// Fallback PTY dimensions when the local terminal size is unknown.
pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_ROWS: u32 = 24;

/// Returns true if `term` is safe to hand to a remote PTY request.
///
/// Only ASCII letters, digits, `-` and `_` are allowed. This guards against
/// shell injection; it says nothing about whether the terminal exists.
pub fn is_valid_term_type(term: &str) -> bool {
    !term.is_empty()
        && term
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Pick the terminal type for an interactive request and validate it.
///
/// Precedence: explicit override, then `$TERM`, then [`DEFAULT_TERM_TYPE`].
/// An invalid value is rejected rather than replaced.
pub fn resolve_term_type(override_term: Option<&str>) -> Result<String> {
    let term = match override_term {
        Some(term) => term.to_string(),
        None => match std::env::var("TERM") {
            Ok(term) if !term.is_empty() => term,
            _ => DEFAULT_TERM_TYPE.to_string(),
        },
    };
    if !is_valid_term_type(&term) {
        return Err(Error::InvalidTermType(term));
    }
    Ok(term)
}

/// Check whether `fd` refers to a terminal.
pub fn is_terminal(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Current size of the terminal on stdout as `(cols, rows)`.
/// Falls back to 80x24 when stdout is not a terminal.
pub fn terminal_size() -> (u32, u32) {
    let mut win_size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let result = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut win_size) };
    if result < 0 || win_size.ws_col == 0 || win_size.ws_row == 0 {
        (DEFAULT_COLS, DEFAULT_ROWS)
    } else {
        (u32::from(win_size.ws_col), u32::from(win_size.ws_row))
    }
}

/// Make `pgid` the foreground process group of the terminal on `fd`.
///
/// SIGTTOU is blocked on the calling thread for the duration, so a caller
/// that is currently in the background is not stopped by the kernel.
pub fn set_foreground(fd: RawFd, pgid: libc::pid_t) -> std::io::Result<()> {
    unsafe {
        let mut block: libc::sigset_t = std::mem::zeroed();
        let mut previous: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut block);
        libc::sigaddset(&mut block, libc::SIGTTOU);
        libc::pthread_sigmask(libc::SIG_BLOCK, &block, &mut previous);
        let result = libc::tcsetpgrp(fd, pgid);
        let err = std::io::Error::last_os_error();
        libc::pthread_sigmask(libc::SIG_SETMASK, &previous, std::ptr::null_mut());
        if result != 0 {
            return Err(err);
        }
    }
    Ok(())
}

/// Hands a terminal to another process group and gives it back on drop.
pub struct ForegroundGuard {
    fd: RawFd,
    previous: libc::pid_t,
}

impl ForegroundGuard {
    pub fn hand_to(fd: RawFd, pgid: libc::pid_t) -> Result<Self> {
        let previous = unsafe { libc::tcgetpgrp(fd) };
        if previous < 0 {
            return Err(Error::Terminal(std::io::Error::last_os_error()));
        }
        set_foreground(fd, pgid).map_err(Error::Terminal)?;
        log::debug!("terminal fd {} handed to process group {}", fd, pgid);
        Ok(Self { fd, previous })
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        if let Err(e) = set_foreground(self.fd, self.previous) {
            log::warn!("failed to reclaim terminal fd {}: {}", self.fd, e);
        }
    }
}
