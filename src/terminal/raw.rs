use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Set while some guard owns the local terminal. Raw mode is process-wide,
/// so only one interactive command may hold it at a time.
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// RAII guard that puts a terminal into raw mode and restores the saved
/// attributes when dropped, on every exit path including unwinding.
pub struct RawModeGuard {
    fd: RawFd,
    saved: libc::termios,
}

impl RawModeGuard {
    /// Switch `fd` into raw mode.
    ///
    /// Fails with [`Error::TerminalBusy`] if another guard is alive, and with
    /// [`Error::Terminal`] if the terminal attributes cannot be read or set.
    /// In both cases the terminal is left as it was.
    pub fn acquire(fd: RawFd) -> Result<Self> {
        if RAW_MODE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::TerminalBusy);
        }

        match Self::enter_raw(fd) {
            Ok(saved) => {
                log::debug!("terminal fd {} switched to raw mode", fd);
                Ok(Self { fd, saved })
            }
            Err(e) => {
                RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
                Err(Error::Terminal(e))
            }
        }
    }

    /// Raw mode on stdin, the usual case.
    pub fn stdin() -> Result<Self> {
        Self::acquire(libc::STDIN_FILENO)
    }

    /// Returns true if some guard currently owns the terminal.
    pub fn is_active() -> bool {
        RAW_MODE_ACTIVE.load(Ordering::SeqCst)
    }

    fn enter_raw(fd: RawFd) -> std::io::Result<libc::termios> {
        unsafe {
            let mut saved: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut saved) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let mut raw = saved;
            libc::cfmakeraw(&mut raw);
            if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(saved)
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let result = unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) };
        if result != 0 {
            log::warn!(
                "failed to restore terminal fd {}: {}",
                self.fd,
                std::io::Error::last_os_error()
            );
        } else {
            log::debug!("terminal fd {} restored", self.fd);
        }
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
    }
}
