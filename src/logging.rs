//! Log subscriber setup.
//!
//! The library only emits `tracing` events; these helpers install a
//! formatting subscriber for binaries and tests that want to see them.

use tracing_subscriber::EnvFilter;

use crate::core::ConfigError;

/// Human-readable logging, filtered by `RUST_LOG` or `debug` if unset.
///
/// Panics if a global subscriber is already installed.
pub fn init_dev_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Logging with an explicit filter such as `"mptcp_meta=trace"`.
///
/// Panics if a global subscriber is already installed.
pub fn init_logging_with_filter(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Like [`init_logging_with_filter`], but reports failure instead of panicking.
pub fn try_init_logging(filter: &str) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(filter).map_err(|e| ConfigError::Logging(e.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Another test may have installed a subscriber first; either way the
        // second attempt here must fail.
        let _ = try_init_logging("mptcp_meta=debug");
        assert!(matches!(
            try_init_logging("mptcp_meta=debug"),
            Err(ConfigError::Logging(_))
        ));
    }

    #[test]
    fn test_bad_filter_rejected() {
        assert!(matches!(
            try_init_logging("mptcp_meta=loudest"),
            Err(ConfigError::Logging(_))
        ));
    }
}
