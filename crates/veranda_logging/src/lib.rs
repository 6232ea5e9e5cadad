//! Shared logging setup for the veranda binary.
//!
//! The panel runs under systemd, so everything goes to stderr and the
//! journal takes care of retention. `RUST_LOG` overrides the defaults.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "veranda=info,veranda_store=info,veranda_provision=info,veranda_jobs=info";

/// Logging configuration for the veranda binary.
pub struct LogConfig {
    /// Raise the default filter to debug for the panel crates.
    pub verbose: bool,
}

/// Initialize tracing with an env-derived filter and stderr output.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.verbose {
            EnvFilter::new(DEFAULT_LOG_FILTER.replace("info", "debug"))
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    Ok(())
}
