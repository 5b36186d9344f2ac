//! Real-terminal plumbing: mode save/restore, window size, signal flags.

use std::io::{self, IsTerminal, Stdin};
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::pty::Winsize;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::termios::{self, SetArg, Termios};
use tracing::{debug, warn};

/// RAII guard that restores a terminal's settings on drop.
///
/// Defaults to the invoking terminal on stdin. Captures nothing when the
/// descriptor is not a TTY; every operation is then a no-op.
pub struct TerminalGuard<F: AsFd = Stdin> {
    fd: F,
    original: Option<Termios>,
}

impl TerminalGuard {
    pub fn capture() -> Self {
        Self::new(io::stdin())
    }
}

impl<F: AsFd> TerminalGuard<F> {
    pub fn new(fd: F) -> Self {
        let original = if fd.as_fd().is_terminal() {
            termios::tcgetattr(fd.as_fd()).ok()
        } else {
            None
        };
        Self { fd, original }
    }

    /// Whether terminal settings were captured (the descriptor is a TTY).
    pub fn is_tty(&self) -> bool {
        self.original.is_some()
    }

    /// Switch to raw mode for transparent passthrough.
    pub fn make_raw(&self) {
        if let Some(ref original) = self.original {
            let mut raw = original.clone();
            termios::cfmakeraw(&mut raw);
            if let Err(e) = termios::tcsetattr(self.fd.as_fd(), SetArg::TCSANOW, &raw) {
                warn!("failed to enter raw mode: {}", e);
            }
        }
    }

    /// Put the saved settings back. Only the first call has any effect.
    pub fn restore(&mut self) {
        if let Some(original) = self.original.take() {
            let _ = termios::tcsetattr(self.fd.as_fd(), SetArg::TCSAFLUSH, &original);
        }
    }
}

impl<F: AsFd> Drop for TerminalGuard<F> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Current window size of the terminal on stdin, if it is one.
pub fn window_size() -> Option<Winsize> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return None;
    }
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ writes a winsize into the valid, exclusively borrowed `ws`
    let rc = unsafe { libc::ioctl(stdin.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };
    (rc == 0).then_some(ws)
}

/// Copy the real terminal's window size onto the PTY. Best effort.
pub fn propagate_window_size(pty: &impl AsFd) {
    let Some(ws) = window_size() else {
        return;
    };
    // SAFETY: TIOCSWINSZ only reads the winsize we pass by reference
    let rc = unsafe { libc::ioctl(pty.as_fd().as_raw_fd(), libc::TIOCSWINSZ, &ws) };
    if rc == 0 {
        debug!(rows = ws.ws_row, cols = ws.ws_col, "propagated window size");
    }
}

// Signal flags (set by the handler, consumed by the I/O loop)
static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);
static SIGTERM_RECEIVED: AtomicBool = AtomicBool::new(false);
static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(signal: libc::c_int) {
    match signal {
        libc::SIGINT => SIGINT_RECEIVED.store(true, Ordering::Release),
        libc::SIGTERM => SIGTERM_RECEIVED.store(true, Ordering::Release),
        libc::SIGWINCH => SIGWINCH_RECEIVED.store(true, Ordering::Release),
        _ => {}
    }
}

/// Signals observed since the last call to [`SignalHandlers::take_pending`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingSignals {
    pub interrupt: bool,
    pub terminate: bool,
    pub resize: bool,
}

/// Handlers for SIGINT, SIGTERM and SIGWINCH. The previous dispositions come
/// back when this is dropped.
///
/// No `SA_RESTART`: a signal interrupts the poll so it is handled promptly.
pub struct SignalHandlers {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalHandlers {
    pub fn install() -> nix::Result<Self> {
        SIGINT_RECEIVED.store(false, Ordering::Release);
        SIGTERM_RECEIVED.store(false, Ordering::Release);
        SIGWINCH_RECEIVED.store(false, Ordering::Release);

        let action = SigAction::new(
            SigHandler::Handler(handle_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let mut handlers = Self {
            previous: Vec::with_capacity(3),
        };
        for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGWINCH] {
            // SAFETY: the handler only stores to atomics, which is async-signal-safe
            let previous = unsafe { sigaction(signal, &action) }?;
            handlers.previous.push((signal, previous));
        }
        Ok(handlers)
    }

    pub fn take_pending(&self) -> PendingSignals {
        PendingSignals {
            interrupt: SIGINT_RECEIVED.swap(false, Ordering::AcqRel),
            terminate: SIGTERM_RECEIVED.swap(false, Ordering::AcqRel),
            resize: SIGWINCH_RECEIVED.swap(false, Ordering::AcqRel),
        }
    }
}

impl Drop for SignalHandlers {
    fn drop(&mut self) {
        for (signal, previous) in self.previous.drain(..).rev() {
            // SAFETY: reinstalling the disposition that was in place before
            let _ = unsafe { sigaction(signal, &previous) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nix::pty::openpty;
    use nix::sys::termios::LocalFlags;

    fn canonical(fd: impl AsFd) -> bool {
        termios::tcgetattr(fd)
            .unwrap()
            .local_flags
            .contains(LocalFlags::ICANON | LocalFlags::ECHO)
    }

    #[test]
    fn test_guard_on_non_tty_is_inert() {
        let file = tempfile::tempfile().unwrap();
        let mut guard = TerminalGuard::new(&file);
        assert!(!guard.is_tty());
        guard.make_raw();
        guard.restore();
    }

    #[test]
    fn test_raw_mode_and_restore_once() {
        let pty = openpty(None, None).unwrap();
        assert!(canonical(&pty.slave));

        let mut guard = TerminalGuard::new(&pty.slave);
        assert!(guard.is_tty());
        guard.make_raw();
        assert!(!canonical(&pty.slave));

        guard.restore();
        assert!(canonical(&pty.slave));
        assert!(!guard.is_tty());

        // Settings changed after the first restore are left alone
        let mut raw = termios::tcgetattr(&pty.slave).unwrap();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &raw).unwrap();
        guard.restore();
        drop(guard);
        assert!(!canonical(&pty.slave));
    }

    #[test]
    fn test_drop_restores() {
        let pty = openpty(None, None).unwrap();
        {
            let guard = TerminalGuard::new(&pty.slave);
            guard.make_raw();
            assert!(!canonical(&pty.slave));
        }
        assert!(canonical(&pty.slave));
    }

    #[test]
    fn test_signal_flags_are_consumed() {
        let handlers = SignalHandlers::install().unwrap();
        assert_eq!(handlers.take_pending(), PendingSignals::default());

        handle_signal(libc::SIGWINCH);
        handle_signal(libc::SIGINT);
        let pending = handlers.take_pending();
        assert!(pending.resize);
        assert!(pending.interrupt);
        assert!(!pending.terminate);

        assert_eq!(handlers.take_pending(), PendingSignals::default());
    }
}
