//! Logging setup for the binary.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for the command line flags. `--quiet` wins over `--debug`.
pub fn level(debug: bool, quiet: bool) -> &'static str {
    match (debug, quiet) {
        (_, true) => "warn",
        (true, false) => "debug",
        (false, false) => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
pub fn init(default_level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}
