//! Alert sinks. The runner only knows the [`Notifier`] capability; what an
//! alert sounds like is decided here.

use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Something that can get the user's attention.
pub trait Notifier {
    /// Fire an alert. Must not block on the alert completing.
    fn notify(&self);
}

/// Rings the terminal bell on stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct BellNotifier;

impl Notifier for BellNotifier {
    fn notify(&self) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}

/// Runs a shell command per alert, detached from the terminal.
pub struct CommandNotifier {
    command: String,
    launched: Mutex<Vec<Child>>,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Number of launched commands not yet reaped.
    pub fn pending(&self) -> usize {
        match self.launched.lock() {
            Ok(mut launched) => {
                reap(&mut launched);
                launched.len()
            }
            Err(_) => 0,
        }
    }
}

fn reap(launched: &mut Vec<Child>) {
    launched.retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_)) | Err(_)));
}

impl Notifier for CommandNotifier {
    fn notify(&self) {
        let Ok(mut launched) = self.launched.lock() else {
            return;
        };
        reap(&mut launched);

        match Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                debug!(pid = child.id(), command = %self.command, "notify command launched");
                launched.push(child);
            }
            Err(e) => warn!(command = %self.command, "failed to launch notify command: {}", e),
        }
    }
}

/// Notifier for the given settings: a command if one is configured, else the bell.
pub fn notifier_for(notify_cmd: Option<&str>) -> Box<dyn Notifier> {
    match notify_cmd {
        Some(cmd) if !cmd.trim().is_empty() => Box::new(CommandNotifier::new(cmd)),
        _ => Box::new(BellNotifier),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_command_notifier_runs_command() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("alerted");
        let notifier = CommandNotifier::new(format!("touch '{}'", marker.display()));

        notifier.notify();

        let deadline = Instant::now() + Duration::from_secs(5);
        while notifier.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(notifier.pending(), 0);
        assert!(marker.exists());
    }

    #[test]
    fn test_command_notifier_reaps_previous_launches() {
        let notifier = CommandNotifier::new("true");
        for _ in 0..5 {
            notifier.notify();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while notifier.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(notifier.pending(), 0);
    }

    #[test]
    fn test_notifier_for_selection() {
        let _bell = notifier_for(None);
        let _blank = notifier_for(Some("   "));
        let _cmd = notifier_for(Some("true"));
    }
}
