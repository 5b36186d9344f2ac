//! Wait detection state machine.
//!
//! The detector never touches a file descriptor. It is fed output bytes,
//! input notifications and clock readings, which keeps it deterministic:
//! every operation has an `_at` form taking an explicit [`Instant`].
//!
//! Two strategies decide whether the command is waiting:
//!
//! - **True detection** (Linux, child pid known): ask the
//!   [`ProcessInspector`] whether the process tree is parked in a terminal
//!   read. A short output stall is enough to confirm.
//! - **Heuristic**: a long output stall plus a last visible line that looks
//!   like a prompt.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::events::{DetectorEvent, EventObserver, ExitReason};
use crate::process_state::{BlockedState, ProcessInspector};
use crate::prompt::{matches_prompt, strip_ansi};

/// Detection thresholds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Ignore everything this long after construction (terminal setup noise)
    pub startup_grace: Duration,
    /// Output stall required by the heuristic path
    pub stall_threshold: Duration,
    /// Output stall required when the kernel says we are blocked on a read
    pub true_detect_stall: Duration,
    /// Repeat alerts this often while still waiting
    pub nag_interval: Duration,
    /// Never alert twice within this gap
    pub min_alert_gap: Duration,
    /// Suppress alerts while the user typed this recently
    pub user_idle_threshold: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(3),
            // LLM CLIs routinely pause 10-30s while generating
            stall_threshold: Duration::from_secs(30),
            true_detect_stall: Duration::from_secs(2),
            nag_interval: Duration::from_secs(60),
            min_alert_gap: Duration::from_secs(1),
            user_idle_threshold: Duration::from_secs(2),
        }
    }
}

/// Detector states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorState {
    Running,
    Waiting,
}

/// Decides whether the wrapped command is waiting for input and when to alert.
pub struct WaitDetector {
    config: DetectorConfig,
    inspector: Box<dyn ProcessInspector>,
    state: DetectorState,
    last_output_time: Instant,
    last_input_time: Instant,
    startup_time: Instant,
    last_visible_line: String,
    last_alert_time: Option<Instant>,
    waiting_since: Option<Instant>,
    child_pid: Option<u32>,
    use_true_detection: bool,
    observer: Option<EventObserver>,
}

impl WaitDetector {
    pub fn new(config: DetectorConfig, inspector: Box<dyn ProcessInspector>) -> Self {
        Self::started_at(config, inspector, Instant::now())
    }

    /// Construct a detector whose clock starts at `now`.
    pub fn started_at(
        config: DetectorConfig,
        inspector: Box<dyn ProcessInspector>,
        now: Instant,
    ) -> Self {
        Self {
            config,
            inspector,
            state: DetectorState::Running,
            last_output_time: now,
            last_input_time: now,
            startup_time: now,
            last_visible_line: String::new(),
            last_alert_time: None,
            waiting_since: None,
            child_pid: None,
            use_true_detection: false,
            observer: None,
        }
    }

    /// Receive [`DetectorEvent`]s as they happen.
    pub fn with_observer(mut self, observer: impl FnMut(&DetectorEvent) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Set the monitored pid once it is known (after fork). True detection is
    /// only enabled when the inspector supports the platform.
    pub fn set_child_pid(&mut self, pid: u32) {
        self.child_pid = Some(pid);
        self.use_true_detection = self.inspector.is_supported();
        debug!(
            pid,
            true_detection = self.use_true_detection,
            "wait detector attached to child"
        );
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn last_visible_line(&self) -> &str {
        &self.last_visible_line
    }

    pub fn waiting_since(&self) -> Option<Instant> {
        self.waiting_since
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child_pid
    }

    pub fn uses_true_detection(&self) -> bool {
        self.use_true_detection
    }

    /// Record output produced by the command.
    pub fn record_output(&mut self, data: &[u8]) {
        self.record_output_at(data, Instant::now());
    }

    pub fn record_output_at(&mut self, data: &[u8], now: Instant) {
        self.last_output_time = now;

        let text = String::from_utf8_lossy(data);
        let visible = text
            .split('\n')
            .rev()
            .map(|line| strip_ansi(line).trim().to_string())
            .find(|line| line.chars().count() > 1);
        if let Some(line) = visible {
            self.last_visible_line = line;
        }

        // Any output means progress, whether or not it was visible
        if self.state == DetectorState::Waiting {
            self.transition_to_running(ExitReason::Output, now);
        }
    }

    /// Record that the user typed something.
    pub fn record_input(&mut self) {
        self.record_input_at(Instant::now());
    }

    pub fn record_input_at(&mut self, now: Instant) {
        self.last_input_time = now;
        if self.state == DetectorState::Waiting {
            self.transition_to_running(ExitReason::Input, now);
        }
    }

    /// Record that the wrapped process exited.
    pub fn record_exit(&mut self, exit_code: i32) {
        self.emit(DetectorEvent::ProcessExited { exit_code });
    }

    /// Re-evaluate the state. Returns true if an alert should fire now.
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> bool {
        let is_waiting = self.check_waiting(now);

        match (is_waiting, self.state) {
            (true, DetectorState::Running) => {
                self.transition_to_waiting(now);
                self.should_alert(now)
            }
            (true, DetectorState::Waiting) => self.should_alert(now),
            (false, DetectorState::Waiting) => {
                self.transition_to_running(ExitReason::Output, now);
                false
            }
            (false, DetectorState::Running) => false,
        }
    }

    fn check_waiting(&self, now: Instant) -> bool {
        if now.saturating_duration_since(self.startup_time) < self.config.startup_grace {
            return false;
        }

        let stall = now.saturating_duration_since(self.last_output_time);

        if let (true, Some(pid)) = (self.use_true_detection, self.child_pid) {
            match self.inspector.any_blocked_on_tty(pid) {
                BlockedState::BlockedTtyRead => return stall >= self.config.true_detect_stall,
                BlockedState::NotBlocked => return false,
                // select/poll might include the terminal; confirm with the prompt
                // heuristic but keep the short stall
                BlockedState::BlockedSelect => {
                    return stall >= self.config.true_detect_stall
                        && matches_prompt(&self.last_visible_line);
                }
                BlockedState::Unknown => {}
            }
        }

        stall >= self.config.stall_threshold && matches_prompt(&self.last_visible_line)
    }

    fn should_alert(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_input_time) < self.config.user_idle_threshold {
            return false;
        }

        if let Some(last) = self.last_alert_time {
            if now.saturating_duration_since(last) < self.config.min_alert_gap {
                return false;
            }
        }

        let just_entered = self.waiting_since == Some(now);
        let nag_due = self
            .last_alert_time
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.nag_interval);

        if just_entered || nag_due {
            self.last_alert_time = Some(now);
            return true;
        }
        false
    }

    fn transition_to_waiting(&mut self, now: Instant) {
        debug!(line = %self.last_visible_line, "entering waiting state");
        self.state = DetectorState::Waiting;
        self.waiting_since = Some(now);
        self.emit(DetectorEvent::WaitingEntered { timestamp: now });
    }

    fn transition_to_running(&mut self, reason: ExitReason, now: Instant) {
        debug!(%reason, "command resumed");
        self.state = DetectorState::Running;
        self.waiting_since = None;
        self.emit(DetectorEvent::WaitingExited {
            timestamp: now,
            reason,
        });
    }

    fn emit(&mut self, event: DetectorEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}
