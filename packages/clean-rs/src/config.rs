use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Default rolling window for `UseCase::debounce_default`.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Runtime configuration shared by use cases and external interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Window used by `debounce_default`.
    pub debounce_duration: Duration,
    /// Cancel streamed handlers after this long. `None` keeps them alive
    /// until the interface is disposed.
    pub watcher_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_duration: DEFAULT_DEBOUNCE,
            watcher_timeout: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// - `CLEAN_DEBOUNCE_MS` (default 300)
    /// - `CLEAN_WATCHER_TIMEOUT_MS` (unset disables the timeout)
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let debounce_duration = match env::var("CLEAN_DEBOUNCE_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse()
                    .context("CLEAN_DEBOUNCE_MS must be a valid number")?,
            ),
            Err(_) => DEFAULT_DEBOUNCE,
        };

        let watcher_timeout = env::var("CLEAN_WATCHER_TIMEOUT_MS")
            .ok()
            .map(|raw| {
                raw.parse()
                    .map(Duration::from_millis)
                    .context("CLEAN_WATCHER_TIMEOUT_MS must be a valid number")
            })
            .transpose()?;

        Ok(Self {
            debounce_duration,
            watcher_timeout,
        })
    }

    /// Override the debounce window.
    pub fn with_debounce_duration(mut self, duration: Duration) -> Self {
        self.debounce_duration = duration;
        self
    }

    /// Cancel streamed handlers after `timeout`.
    pub fn with_watcher_timeout(mut self, timeout: Duration) -> Self {
        self.watcher_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.debounce_duration, Duration::from_millis(300));
        assert!(config.watcher_timeout.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::default()
            .with_debounce_duration(Duration::from_millis(50))
            .with_watcher_timeout(Duration::from_secs(2));
        assert_eq!(config.debounce_duration, Duration::from_millis(50));
        assert_eq!(config.watcher_timeout, Some(Duration::from_secs(2)));
    }
}
