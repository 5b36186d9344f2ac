use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::detector::DetectorConfig;
use crate::error::WaitingError;

// =============================================================================
// Settings (figment-layered from defaults / WAITING_* env vars / CLI flags)
// =============================================================================
//
//   env var:   WAITING_STALL=45        (heuristic stall threshold, seconds)
//              WAITING_NAG=120         (nag interval, seconds)
//              WAITING_TRUE_STALL=1.5  (stall when blocked on a tty read, seconds)
//              WAITING_NOTIFY_CMD='paplay ~/bell.wav'
//              WAITING_LOG_FILE=/tmp/waiting.log
//
//   CLI flags of the same names win over the environment. Nothing is read
//   from or written to disk.

/// Tunable settings, deserialized by figment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_stall")]
    pub stall: f64,
    #[serde(default = "default_nag")]
    pub nag: f64,
    #[serde(default = "default_true_stall")]
    pub true_stall: f64,
    /// Shell command run on every alert instead of ringing the terminal bell
    #[serde(default)]
    pub notify_cmd: Option<String>,
    /// Where tracing output goes (defaults to `~/.waiting.log`)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stall: default_stall(),
            nag: default_nag(),
            true_stall: default_true_stall(),
            notify_cmd: None,
            log_file: None,
        }
    }
}

fn default_stall() -> f64 {
    30.0
}
fn default_nag() -> f64 {
    60.0
}
fn default_true_stall() -> f64 {
    2.0
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nag: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_stall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Build a figment that layers: defaults → WAITING_* env vars → CLI overrides.
pub fn load_settings(overrides: &Overrides) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Serialized},
    };

    Figment::from(Serialized::defaults(Settings::default()))
        .merge(Env::prefixed("WAITING_"))
        .merge(Serialized::defaults(overrides))
}

impl Settings {
    pub fn load(overrides: &Overrides) -> Result<Self, WaitingError> {
        Ok(load_settings(overrides).extract()?)
    }

    /// Detector thresholds with the tunable ones replaced.
    pub fn detector_config(&self) -> Result<DetectorConfig, WaitingError> {
        Ok(DetectorConfig {
            stall_threshold: seconds("stall", self.stall)?,
            nag_interval: seconds("nag", self.nag)?,
            true_detect_stall: seconds("true_stall", self.true_stall)?,
            ..Default::default()
        })
    }

    /// Configured log file, or `~/.waiting.log`.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".waiting.log")))
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, WaitingError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        WaitingError::InvalidConfig(format!(
            "{name} must be a non-negative number of seconds, got {value}"
        ))
    })
}
