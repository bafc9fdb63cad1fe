//! Tracing subscriber setup for the CLI.

use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. Verbose mode lowers the default filter
/// to debug; `RUST_LOG` overrides either default.
pub(crate) fn init(verbose: bool) -> Result<(), SetGlobalDefaultError> {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
