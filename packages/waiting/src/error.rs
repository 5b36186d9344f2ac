use std::io;

/// Errors surfaced while setting up or supervising a wrapped command.
#[derive(Debug, thiserror::Error)]
pub enum WaitingError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[cfg(unix)]
    #[error("failed to open PTY: {0}")]
    PtyOpen(#[source] nix::Error),

    #[cfg(unix)]
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] nix::Error),

    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] Box<figment::Error>),
}

impl WaitingError {
    /// Exit code reported for this failure, following shell conventions.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandNotFound(_) => 127,
            Self::PermissionDenied(_) => 126,
            _ => 1,
        }
    }

    /// Classify a spawn failure for `command`.
    pub fn from_spawn(command: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::CommandNotFound(command.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(command.to_string()),
            _ => Self::SpawnFailed {
                command: command.to_string(),
                source: err,
            },
        }
    }
}

impl From<figment::Error> for WaitingError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
