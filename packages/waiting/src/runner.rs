//! PTY supervisor: spawns the command on a pseudo-terminal, relays bytes in
//! both directions and drives the [`WaitDetector`] from the same loop.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::openpty;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::detector::{DetectorConfig, WaitDetector};
use crate::error::WaitingError;
use crate::events::DetectorEvent;
use crate::notifier::Notifier;
use crate::process_state::default_inspector;
use crate::terminal::{self, SignalHandlers, TerminalGuard};

/// Upper bound on a single poll; also the detector's evaluation cadence.
pub const POLL_INTERVAL_MS: u16 = 100;

/// Bytes moved per read.
pub const BUFFER_SIZE: usize = 4096;

/// Reads attempted when draining the PTY after the command exited.
const MAX_DRAIN_READS: usize = 256;

pub const USAGE: &str = "usage: waiting [OPTIONS] [--] <COMMAND> [ARGS]...";

/// Runs one command under a PTY and alerts through `notifier` whenever it
/// looks like the command is waiting for the user.
pub struct Runner<'a> {
    notifier: &'a dyn Notifier,
    config: DetectorConfig,
}

impl<'a> Runner<'a> {
    pub fn new(notifier: &'a dyn Notifier, config: DetectorConfig) -> Self {
        Self { notifier, config }
    }

    /// Run `command` to completion and return the exit code to report.
    ///
    /// 127 and 126 mean the command was not found or not executable,
    /// 128+N that it died from signal N. The invoking terminal is restored
    /// before this returns, on every path.
    pub fn run(&self, command: &[String]) -> i32 {
        if command.is_empty() {
            eprintln!("{USAGE}");
            return 1;
        }

        let mut terminal = TerminalGuard::capture();
        match self.supervise(command, &terminal) {
            Ok(code) => code,
            Err(e) => {
                terminal.restore();
                eprintln!("waiting: {e}");
                e.exit_code()
            }
        }
    }

    fn supervise(&self, command: &[String], terminal: &TerminalGuard) -> Result<i32, WaitingError> {
        let winsize = terminal::window_size();
        let pty = openpty(winsize.as_ref(), None).map_err(WaitingError::PtyOpen)?;
        // Notify commands and anything else launched later must not inherit it
        set_cloexec(&pty.master)?;
        let signals = SignalHandlers::install().map_err(WaitingError::Signal)?;

        let slave_fd = pty.slave.as_raw_fd();
        let master_fd = pty.master.as_raw_fd();

        // SAFETY: the pre_exec closure runs in the child between fork and exec
        // and only makes async-signal-safe calls (setsid, ioctl, dup2, close).
        // The raw fds are captured by value while the OwnedFds are still alive.
        let spawned = unsafe {
            Command::new(&command[0])
                .args(&command[1..])
                .pre_exec(move || {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    for target in 0..=2 {
                        if libc::dup2(slave_fd, target) == -1 {
                            return Err(io::Error::last_os_error());
                        }
                    }
                    if slave_fd > 2 {
                        libc::close(slave_fd);
                    }
                    libc::close(master_fd);
                    Ok(())
                })
                .spawn()
        };
        let child = spawned.map_err(|e| WaitingError::from_spawn(&command[0], e))?;
        drop(pty.slave);

        let pid = child.id();
        info!(pid, command = ?command, "spawned command on pty");

        let mut detector =
            WaitDetector::new(self.config.clone(), default_inspector()).with_observer(log_event);
        detector.set_child_pid(pid);

        set_nonblocking(&pty.master)?;
        let master = File::from(pty.master);
        terminal::propagate_window_size(&master);
        terminal.make_raw();

        // Unbuffered handles on the real terminal
        let stdin = if terminal.is_tty() {
            Some(File::from(io::stdin().as_fd().try_clone_to_owned()?))
        } else {
            None
        };
        let stdout = File::from(io::stdout().as_fd().try_clone_to_owned()?);

        let mut session = Session {
            child,
            master,
            master_open: true,
            stdin,
            stdout,
            detector,
            notifier: self.notifier,
        };
        Ok(session.relay(&signals))
    }
}

struct Session<'a> {
    child: Child,
    master: File,
    /// Cleared once every slave handle is gone; a hung-up master polls ready forever
    master_open: bool,
    stdin: Option<File>,
    stdout: File,
    detector: WaitDetector,
    notifier: &'a dyn Notifier,
}

impl Session<'_> {
    fn relay(&mut self, signals: &SignalHandlers) -> i32 {
        let mut buf = [0u8; BUFFER_SIZE];

        loop {
            let pending = signals.take_pending();
            if pending.resize {
                terminal::propagate_window_size(&self.master);
            }
            if pending.interrupt {
                self.forward(Signal::SIGINT);
            }
            if pending.terminate {
                self.forward(Signal::SIGTERM);
                info!("terminated, leaving command to exit on its own");
                return 128 + libc::SIGTERM;
            }

            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.drain_output(&mut buf);
                    let code = exit_code_from_status(status);
                    self.detector.record_exit(code);
                    return code;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to query child status: {}", e);
                    return 1;
                }
            }

            let (master_ready, stdin_ready) = match self.wait_readable() {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    debug!("poll failed: {}", e);
                    continue;
                }
            };

            if master_ready {
                self.relay_output(&mut buf);
            }
            if stdin_ready {
                self.relay_input(&mut buf);
            }

            if self.detector.check() {
                debug!("alerting");
                self.notifier.notify();
            }
        }
    }

    /// Wait up to one poll interval. Returns (pty readable, stdin readable).
    ///
    /// With nothing left to watch this is a plain sleep of one interval.
    fn wait_readable(&self) -> Result<(bool, bool), Errno> {
        let mut fds = Vec::with_capacity(2);
        if self.master_open {
            fds.push(PollFd::new(self.master.as_fd(), PollFlags::POLLIN));
        }
        let stdin_slot = fds.len();
        if let Some(stdin) = &self.stdin {
            fds.push(PollFd::new(stdin.as_fd(), PollFlags::POLLIN));
        }

        poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS))?;

        let ready = |fd: &PollFd| {
            fd.revents().is_some_and(|events| {
                events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })
        };
        let master_ready = self.master_open && fds.first().is_some_and(ready);
        let stdin_ready = self.stdin.is_some() && fds.get(stdin_slot).is_some_and(ready);
        Ok((master_ready, stdin_ready))
    }

    fn relay_output(&mut self, buf: &mut [u8]) {
        match self.master.read(buf) {
            Ok(0) => {
                debug!("pty closed");
                self.master_open = false;
            }
            Ok(n) => {
                let data = &buf[..n];
                if let Err(e) = self.stdout.write_all(data) {
                    debug!("stdout write failed: {}", e);
                }
                self.detector.record_output(data);
            }
            Err(e) if is_transient(&e) => {}
            // EIO once the last slave handle is gone
            Err(e) => {
                debug!("pty hung up: {}", e);
                self.master_open = false;
            }
        }
    }

    fn relay_input(&mut self, buf: &mut [u8]) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        match stdin.read(buf) {
            Ok(0) => {
                debug!("stdin closed");
                self.stdin = None;
            }
            Ok(n) => {
                if let Err(e) = write_all(&mut self.master, &buf[..n]) {
                    debug!("pty write failed: {}", e);
                }
                self.detector.record_input();
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                debug!("stdin read failed: {}", e);
                self.stdin = None;
            }
        }
    }

    /// Copy whatever the command wrote before exiting.
    fn drain_output(&mut self, buf: &mut [u8]) {
        for _ in 0..MAX_DRAIN_READS {
            match self.master.read(buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if self.stdout.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn forward(&self, signal: Signal) {
        let pid = Pid::from_raw(self.child.id() as i32);
        match kill(pid, signal) {
            Ok(()) => debug!(%signal, "forwarded signal to command"),
            Err(e) => debug!(%signal, "failed to forward signal: {}", e),
        }
    }
}

fn log_event(event: &DetectorEvent) {
    match event {
        DetectorEvent::WaitingEntered { .. } => info!("command is waiting for input"),
        DetectorEvent::WaitingExited { reason, .. } => info!(%reason, "command resumed"),
        DetectorEvent::ProcessExited { exit_code } => info!(exit_code, "command exited"),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn set_cloexec(fd: &impl AsFd) -> io::Result<()> {
    let raw = fd.as_fd().as_raw_fd();
    // SAFETY: F_GETFD/F_SETFD on a descriptor we own
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFD);
        if flags == -1 || libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let raw = fd.as_fd().as_raw_fd();
    // SAFETY: F_GETFL/F_SETFL on a descriptor we own
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFL);
        if flags == -1 || libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Write all of `data` to a non-blocking descriptor, waiting for it to drain
/// when full. Gives up after one poll interval without progress.
fn write_all(out: &mut File, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match out.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let mut fds = [PollFd::new(out.as_fd(), PollFlags::POLLOUT)];
                match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                    Ok(0) => return Err(e),
                    Ok(_) | Err(Errno::EINTR) => continue,
                    Err(errno) => return Err(errno.into()),
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Shell-style exit code: the status code, or 128+N when killed by signal N.
pub fn exit_code_from_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        128 + signal
    } else {
        1
    }
}
