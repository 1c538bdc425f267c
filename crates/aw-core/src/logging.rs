//! Structured logging for aw.
//!
//! Uses `tracing` with an `EnvFilter` so `RUST_LOG` overrides the
//! configured level. Initialize once at startup; repeated calls are
//! no-ops so tests can call it freely.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// The level comes from `RUST_LOG` when set, otherwise from
/// `config.level`. Returns whether this call performed initialization.
pub fn init_logging(config: &LogConfig) -> bool {
    let mut initialized = false;
    LOGGING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
        let result = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        initialized = result.is_ok();
        initialized
    });
    initialized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = LogConfig::default();
        init_logging(&config);
        // Second call must not panic or re-initialize.
        assert!(!init_logging(&config));
        assert!(LOGGING_INITIALIZED.get().is_some());
    }
}
