// Library interface for waiting
// Wait detection is platform-neutral; the PTY runner needs a Unix host

pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod notifier;
pub mod process_state;
pub mod prompt;
#[cfg(unix)]
pub mod runner;
#[cfg(unix)]
pub mod terminal;

pub use config::{Overrides, Settings};
pub use detector::{DetectorConfig, DetectorState, WaitDetector};
pub use error::WaitingError;
pub use events::{DetectorEvent, EventObserver, ExitReason};
pub use notifier::{BellNotifier, CommandNotifier, Notifier, notifier_for};
pub use process_state::{BlockedState, ProcessInspector};
#[cfg(unix)]
pub use runner::Runner;
