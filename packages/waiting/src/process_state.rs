//! Process state introspection for true input-blocked detection.
//!
//! On Linux the kernel exposes, per process, the scheduler state in
//! `/proc/<pid>/stat` and the wait channel (the kernel function a sleeping
//! task is parked in) in `/proc/<pid>/wchan`. A task sleeping in `n_tty_read`
//! is provably waiting for terminal input, which beats any output heuristic.
//!
//! Elsewhere there is no `/proc`; [`NullInspector`] answers
//! [`BlockedState::Unknown`] and the detector falls back to heuristics.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use tracing::trace;

/// State of a process with respect to input blocking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockedState {
    /// Could not determine (permissions, vanished process, unsupported platform)
    Unknown,
    /// Running, or sleeping on something other than terminal input
    NotBlocked,
    /// Sleeping inside a terminal read
    BlockedTtyRead,
    /// Sleeping in select/poll, which may or may not include the terminal
    BlockedSelect,
}

/// Wait channels that mean a terminal read is in progress.
const TTY_READ_WCHANS: &[&str] = &["n_tty_read", "tty_read", "pty_read", "wait_woken"];

/// Wait channels for select/poll; the watched fds are not visible from here.
const SELECT_WCHANS: &[&str] = &[
    "do_select",
    "do_poll",
    "poll_schedule_timeout",
    "do_sys_poll",
    "core_sys_select",
];

/// Answers whether a process tree is blocked waiting for terminal input.
pub trait ProcessInspector {
    /// Whether this inspector can produce anything other than `Unknown`.
    fn is_supported(&self) -> bool;

    /// Aggregate blocked state of `pid` and all of its descendants.
    fn any_blocked_on_tty(&self, pid: u32) -> BlockedState;
}

/// Pick the inspector for the running platform.
pub fn default_inspector() -> Box<dyn ProcessInspector> {
    if cfg!(target_os = "linux") {
        Box::new(ProcfsInspector::new())
    } else {
        Box::new(NullInspector)
    }
}

/// Inspector for platforms without `/proc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullInspector;

impl ProcessInspector for NullInspector {
    fn is_supported(&self) -> bool {
        false
    }

    fn any_blocked_on_tty(&self, _pid: u32) -> BlockedState {
        BlockedState::Unknown
    }
}

/// `/proc`-backed inspector.
#[derive(Clone, Debug)]
pub struct ProcfsInspector {
    root: PathBuf,
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Inspect a procfs mounted (or fabricated) somewhere other than `/proc`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Single-character scheduler state (`R`, `S`, `D`, `Z`, `T`, ...), or
    /// `None` if the stat line could not be read or parsed.
    pub fn state(&self, pid: u32) -> Option<char> {
        let content = fs::read_to_string(self.root.join(pid.to_string()).join("stat")).ok()?;
        // Format: pid (comm) state ppid ...; comm may itself contain ')' and spaces
        let close_paren = content.rfind(')')?;
        content[close_paren + 1..]
            .split_whitespace()
            .next()
            .and_then(|field| field.chars().next())
    }

    /// Kernel wait channel, or `None` if unavailable or not sleeping.
    pub fn wchan(&self, pid: u32) -> Option<String> {
        let content = fs::read_to_string(self.root.join(pid.to_string()).join("wchan")).ok()?;
        let wchan = content.trim();
        if wchan.is_empty() || wchan == "0" {
            return None;
        }
        Some(wchan.to_string())
    }

    /// Blocked state of a single process.
    pub fn blocked_state(&self, pid: u32) -> BlockedState {
        match self.state(pid) {
            None => return BlockedState::Unknown,
            Some('S') => {}
            Some(_) => return BlockedState::NotBlocked,
        }

        let Some(wchan) = self.wchan(pid) else {
            return BlockedState::Unknown;
        };

        if TTY_READ_WCHANS.contains(&wchan.as_str()) {
            BlockedState::BlockedTtyRead
        } else if SELECT_WCHANS.contains(&wchan.as_str()) {
            BlockedState::BlockedSelect
        } else {
            BlockedState::NotBlocked
        }
    }

    /// All descendants of `pid`, depth first. Entries that vanish mid-walk are
    /// skipped; a pid is never visited twice even if the tree is reshuffled
    /// while we read it.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut found = Vec::new();
        let mut seen = HashSet::from([pid]);
        self.collect_descendants(pid, &mut seen, &mut found);
        found
    }

    fn collect_descendants(&self, pid: u32, seen: &mut HashSet<u32>, found: &mut Vec<u32>) {
        let path = self
            .root
            .join(pid.to_string())
            .join("task")
            .join(pid.to_string())
            .join("children");
        let Ok(content) = fs::read_to_string(&path) else {
            return;
        };

        for child in content.split_whitespace().filter_map(|p| p.parse::<u32>().ok()) {
            if seen.insert(child) {
                found.push(child);
                self.collect_descendants(child, seen, found);
            }
        }
    }
}

impl ProcessInspector for ProcfsInspector {
    fn is_supported(&self) -> bool {
        cfg!(target_os = "linux")
    }

    fn any_blocked_on_tty(&self, pid: u32) -> BlockedState {
        if !self.is_supported() {
            return BlockedState::Unknown;
        }

        let mut found_select = false;
        let mut found_unknown = false;

        for candidate in std::iter::once(pid).chain(self.descendants(pid)) {
            match self.blocked_state(candidate) {
                BlockedState::BlockedTtyRead => {
                    trace!(pid = candidate, "process blocked on tty read");
                    return BlockedState::BlockedTtyRead;
                }
                BlockedState::BlockedSelect => found_select = true,
                BlockedState::Unknown => found_unknown = true,
                BlockedState::NotBlocked => {}
            }
        }

        if found_select {
            BlockedState::BlockedSelect
        } else if found_unknown {
            BlockedState::Unknown
        } else {
            BlockedState::NotBlocked
        }
    }
}
