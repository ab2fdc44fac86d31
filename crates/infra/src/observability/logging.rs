//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the configured level is used as the
//! filter directive.

use keel_domain::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, falling back to `config.level`, then `info`
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Returns `false` when a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let (json, human) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json().with_current_span(true)), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(false).compact()))
    };

    let installed =
        tracing_subscriber::registry().with(build_filter(config)).with(json).with(human).try_init();

    match installed {
        Ok(()) => {
            tracing::info!(level = %config.level, json = config.json, "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}
