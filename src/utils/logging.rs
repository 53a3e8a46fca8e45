//! Diagnostic logging setup.

use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable holding `EnvFilter` directives.
pub const LOG_ENV: &str = "STREAMSCRIBE_LOG";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Falls back to [`DEFAULT_LOG_LEVEL`] when the directives are missing or do
/// not parse.
pub fn build_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Installs the global subscriber. Logs go to stderr, or are appended to
/// `log_file` without ANSI colors when one is given.
pub fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let directives = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(directives.as_deref()))
        .with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| -> Box<dyn Error> { err })
}
