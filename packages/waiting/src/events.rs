use std::fmt;
use std::time::Instant;

/// Why the detector left the waiting state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    Input,
    Output,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Input => write!(f, "input"),
            ExitReason::Output => write!(f, "output"),
        }
    }
}

/// Events emitted by the wait detector to an optional observer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectorEvent {
    /// The command started waiting for input
    WaitingEntered { timestamp: Instant },
    /// The command stopped waiting
    WaitingExited {
        timestamp: Instant,
        reason: ExitReason,
    },
    /// The wrapped process terminated
    ProcessExited { exit_code: i32 },
}

/// Observer callback for detector events
pub type EventObserver = Box<dyn FnMut(&DetectorEvent)>;
