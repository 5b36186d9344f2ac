use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use waiting::{Overrides, Settings, notifier_for};

#[derive(Parser)]
#[command(name = "waiting")]
#[command(about = "Run an interactive command and alert when it is waiting for input")]
#[command(override_usage = "waiting [OPTIONS] [--] <COMMAND> [ARGS]...")]
struct Args {
    /// Seconds of silence before a prompt-looking line counts as waiting
    #[arg(long, value_name = "SECS")]
    stall: Option<f64>,

    /// Seconds between repeated alerts while still waiting
    #[arg(long, value_name = "SECS")]
    nag: Option<f64>,

    /// Seconds of silence required when the command is blocked reading the terminal
    #[arg(long, value_name = "SECS")]
    true_stall: Option<f64>,

    /// Shell command to run on every alert instead of ringing the bell
    #[arg(long, value_name = "CMD")]
    notify_cmd: Option<String>,

    /// Where to write the log (default: ~/.waiting.log)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Command to run, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            stall: self.stall,
            nag: self.nag,
            true_stall: self.true_stall,
            notify_cmd: self.notify_cmd.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(&args.overrides()).context("Failed to load settings")?;
    let detector_config = settings.detector_config()?;

    if let Some(path) = settings.log_path() {
        init_logging(&path, args.debug);
    }

    let mut command = args.command;
    if command.first().is_some_and(|arg| arg == "--") {
        command.remove(0);
    }

    info!("Starting waiting for: {:?}", command);
    let notifier = notifier_for(settings.notify_cmd.as_deref());
    let code = run(notifier.as_ref(), detector_config, &command);
    info!(code, "waiting exiting");

    std::process::exit(code);
}

#[cfg(unix)]
fn run(notifier: &dyn waiting::Notifier, config: waiting::DetectorConfig, command: &[String]) -> i32 {
    waiting::Runner::new(notifier, config).run(command)
}

#[cfg(not(unix))]
fn run(_: &dyn waiting::Notifier, _: waiting::DetectorConfig, _: &[String]) -> i32 {
    eprintln!("waiting: PTY supervision is only supported on Unix");
    1
}

/// Log to a file; the terminal belongs to the wrapped command.
fn init_logging(path: &Path, debug: bool) {
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("waiting: logging disabled, cannot open {}: {}", path.display(), e);
            return;
        }
    };

    let default_filter = if debug { "waiting=debug" } else { "waiting=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(filter)
        .init();
}
