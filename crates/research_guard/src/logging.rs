//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when it is set. Output goes to
//! stderr so tools can keep stdout for machine-readable reports.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{GuardError, Result};

fn filter_for(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            GuardError::Config(format!("invalid log level '{}': {}", config.level, e))
        }),
    }
}

/// Install the global fmt subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed, so embedding
/// applications and tests may call this more than once.
pub fn init(config: &LogConfig) -> Result<bool> {
    let filter = filter_for(config)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LogConfig::default();
        let _ = init(&config).unwrap();
        assert!(!init(&config).unwrap());
    }

    #[test]
    fn test_filter_accepts_directives() {
        let config = LogConfig {
            level: "research_guard=debug,warn".to_string(),
        };
        assert!(filter_for(&config).is_ok());
    }
}
