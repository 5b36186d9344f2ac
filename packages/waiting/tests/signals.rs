#![cfg(unix)]

use std::os::fd::AsRawFd;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::pty::{Winsize, openpty};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const WAITING: &str = env!("CARGO_BIN_EXE_waiting");

/// `waiting -- sh -c <script>` run inside `dir`, detached from the test's terminal.
fn waiting(dir: &Path, script: &str) -> Command {
    let mut cmd = Command::new(WAITING);
    cmd.arg("--log-file")
        .arg(dir.join("waiting.log"))
        .args(["--", "sh", "-c", script])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

fn signal(child: &Child, signal: Signal) {
    kill(Pid::from_raw(child.id() as i32), signal).unwrap();
}

fn wait_for_file(path: &Path) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Poll `path` until its trimmed content equals `expected`.
fn wait_for_content(path: &Path, expected: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut last = String::new();
    while Instant::now() < deadline {
        last = std::fs::read_to_string(path).unwrap_or_default().trim().to_string();
        if last == expected {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    last
}

fn wait_exit(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("waiting did not exit in time");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn winsize(rows: u16, cols: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

#[test]
fn test_sigint_is_forwarded() {
    let tmp = tempfile::tempdir().unwrap();
    let mut child = waiting(
        tmp.path(),
        "trap 'exit 7' INT; touch ready; while :; do sleep 0.1; done",
    )
    .spawn()
    .unwrap();

    assert!(wait_for_file(&tmp.path().join("ready")));
    signal(&child, Signal::SIGINT);

    // The command's own exit code comes back, so the wrapper survived SIGINT
    assert_eq!(wait_exit(&mut child).code(), Some(7));
}

#[test]
fn test_sigterm_is_forwarded_then_exits_143() {
    let tmp = tempfile::tempdir().unwrap();
    let mut child = waiting(
        tmp.path(),
        "trap '' HUP; trap 'touch got_term; exit 0' TERM; touch ready; while :; do sleep 0.1; done",
    )
    .spawn()
    .unwrap();

    assert!(wait_for_file(&tmp.path().join("ready")));
    signal(&child, Signal::SIGTERM);

    assert_eq!(wait_exit(&mut child).code(), Some(128 + 15));
    assert!(wait_for_file(&tmp.path().join("got_term")));
}

#[test]
fn test_sigwinch_propagates_window_size() {
    let tmp = tempfile::tempdir().unwrap();
    let outer = openpty(Some(&winsize(40, 100)), None).unwrap();

    let mut cmd = waiting(
        tmp.path(),
        "stty size > initial; trap 'stty size > resized' WINCH; touch ready; \
         while :; do sleep 0.1; done",
    );
    cmd.stdin(Stdio::from(outer.slave.try_clone().unwrap()));
    let mut child = cmd.spawn().unwrap();

    assert!(wait_for_file(&tmp.path().join("ready")));
    assert_eq!(wait_for_content(&tmp.path().join("initial"), "40 100"), "40 100");

    let resized = winsize(50, 120);
    // SAFETY: TIOCSWINSZ reads the winsize we pass by reference
    let rc = unsafe { libc::ioctl(outer.master.as_raw_fd(), libc::TIOCSWINSZ, &resized) };
    assert_eq!(rc, 0);
    signal(&child, Signal::SIGWINCH);

    assert_eq!(wait_for_content(&tmp.path().join("resized"), "50 120"), "50 120");

    signal(&child, Signal::SIGTERM);
    assert_eq!(wait_exit(&mut child).code(), Some(128 + 15));
}
