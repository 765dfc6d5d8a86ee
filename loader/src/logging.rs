//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Install a fmt subscriber writing to stderr. `RUST_LOG` wins over
/// `cfg.level`. Fails, without panicking, if a global subscriber is already
/// installed.
pub fn init_tracing(cfg: &LogConfig) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
