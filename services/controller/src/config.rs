//! Configuration for the instance-set controller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use iset_instanceset::EngineOptions;
use iset_reconcile::{DEFAULT_MAX_RETRIES, DEFAULT_RESYNC_INTERVAL, DEFAULT_RETRY_WINDOW};

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Number of keys reconciled concurrently.
    pub workers: usize,

    /// Interval between full resyncs of every instance set.
    pub resync_interval: Duration,

    /// Failed passes tolerated per key within the retry window.
    pub max_retries: u32,

    /// Retry window duration.
    pub retry_window: Duration,

    /// Pods can change cpu/memory without a restart.
    pub pod_vertical_scaling: bool,

    /// JSON file of instance sets loaded into the store at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workers: 4,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_window: DEFAULT_RETRY_WINDOW,
            pod_vertical_scaling: true,
            seed_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Unset or unparsable values
    /// fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let log_level = lookup("ISET_LOG_LEVEL").unwrap_or(defaults.log_level);

        let workers = lookup("ISET_WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.workers);

        let resync_interval = lookup("ISET_RESYNC_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.resync_interval);

        let max_retries = lookup("ISET_MAX_RETRIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let retry_window = lookup("ISET_RETRY_WINDOW_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_window);

        let pod_vertical_scaling = lookup("ISET_POD_VERTICAL_SCALING")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pod_vertical_scaling);

        let seed_file = lookup("ISET_SEED_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_level,
            workers,
            resync_interval,
            max_retries,
            retry_window,
            pod_vertical_scaling,
            seed_file,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            pod_vertical_scaling: self.pod_vertical_scaling,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.workers, 4);
        assert_eq!(config.resync_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_window, Duration::from_secs(600));
        assert!(config.pod_vertical_scaling);
        assert!(config.seed_file.is_none());
    }

    #[test]
    fn test_values_from_environment() {
        let config = Config::from_lookup(lookup_from(&[
            ("ISET_LOG_LEVEL", "debug"),
            ("ISET_WORKERS", "8"),
            ("ISET_RESYNC_INTERVAL_SECS", "5"),
            ("ISET_MAX_RETRIES", "1"),
            ("ISET_POD_VERTICAL_SCALING", "false"),
            ("ISET_SEED_FILE", "/etc/iset/sets.json"),
        ]))
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.workers, 8);
        assert_eq!(config.resync_interval, Duration::from_secs(5));
        assert_eq!(config.max_retries, 1);
        assert!(!config.engine_options().pod_vertical_scaling);
        assert_eq!(config.seed_file, Some(PathBuf::from("/etc/iset/sets.json")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("ISET_WORKERS", "0"),
            ("ISET_RESYNC_INTERVAL_SECS", "soon"),
            ("ISET_POD_VERTICAL_SCALING", "maybe"),
        ]))
        .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.resync_interval, Duration::from_secs(30));
        assert!(config.pod_vertical_scaling);
    }
}
