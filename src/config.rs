//! Configuration Module
//!
//! Handles cache configuration, optionally loaded from environment variables.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::cache::{default_provider, KeyProvider};
use crate::error::{CacheError, Result};

/// Default delay before the first sweep.
pub const DEFAULT_FIRST_SWEEP: Duration = Duration::from_secs(30);

/// Default interval between subsequent sweeps.
pub const DEFAULT_SUCCEEDING_SWEEP: Duration = Duration::from_secs(120);

/// Cache configuration parameters.
#[derive(Clone)]
pub struct CacheConfig {
    /// Run the background sweep
    pub enable_cleanup: bool,
    /// Delay before the first sweep
    pub first_sweep: Duration,
    /// Interval between subsequent sweeps
    pub succeeding_sweep: Duration,
    /// Storage key derivation
    pub key_provider: KeyProvider,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLE_CLEANUP` - Run the background sweep (default: true)
    /// - `CACHE_FIRST_SWEEP_SECS` - Delay before the first sweep (default: 30)
    /// - `CACHE_SUCCEEDING_SWEEP_SECS` - Interval between sweeps (default: 120)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enable_cleanup: env::var("CACHE_ENABLE_CLEANUP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.enable_cleanup),
            first_sweep: env::var("CACHE_FIRST_SWEEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.first_sweep),
            succeeding_sweep: env::var("CACHE_SUCCEEDING_SWEEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.succeeding_sweep),
            key_provider: defaults.key_provider,
        }
    }

    /// Enables or disables the background sweep.
    pub fn with_cleanup(mut self, enabled: bool) -> Self {
        self.enable_cleanup = enabled;
        self
    }

    /// Sets the delay before the first sweep.
    pub fn with_first_sweep(mut self, delay: Duration) -> Self {
        self.first_sweep = delay;
        self
    }

    /// Sets the interval between subsequent sweeps.
    pub fn with_succeeding_sweep(mut self, interval: Duration) -> Self {
        self.succeeding_sweep = interval;
        self
    }

    /// Replaces the storage key derivation.
    ///
    /// Namespace filters of `count`, `entries`, `keys` and `clear` follow the
    /// provider, so a case-sensitive provider gives case-sensitive filters.
    pub fn with_key_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> u64 + Send + Sync + 'static,
    {
        self.key_provider = std::sync::Arc::new(provider);
        self
    }

    /// Rejects a zero succeeding-sweep interval, which cannot be scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.succeeding_sweep.is_zero() {
            return Err(CacheError::InvalidSweepInterval {
                name: "succeeding_sweep",
                value: self.succeeding_sweep,
            });
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_cleanup: true,
            first_sweep: DEFAULT_FIRST_SWEEP,
            succeeding_sweep: DEFAULT_SUCCEEDING_SWEEP,
            key_provider: default_provider(),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("enable_cleanup", &self.enable_cleanup)
            .field("first_sweep", &self.first_sweep)
            .field("succeeding_sweep", &self.succeeding_sweep)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert!(config.enable_cleanup);
        assert_eq!(config.first_sweep, Duration::from_secs(30));
        assert_eq!(config.succeeding_sweep, Duration::from_secs(120));
        assert_eq!(
            (config.key_provider)("Key", Some("Ns")),
            crate::cache::default_key_provider("key", Some("ns"))
        );
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_ENABLE_CLEANUP");
        env::remove_var("CACHE_FIRST_SWEEP_SECS");
        env::remove_var("CACHE_SUCCEEDING_SWEEP_SECS");

        let config = CacheConfig::from_env();
        assert!(config.enable_cleanup);
        assert_eq!(config.first_sweep, DEFAULT_FIRST_SWEEP);
        assert_eq!(config.succeeding_sweep, DEFAULT_SUCCEEDING_SWEEP);
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::default()
            .with_cleanup(false)
            .with_first_sweep(Duration::from_secs(1))
            .with_succeeding_sweep(Duration::from_secs(2))
            .with_key_provider(|key, _| key.len() as u64);

        assert!(!config.enable_cleanup);
        assert_eq!(config.first_sweep, Duration::from_secs(1));
        assert_eq!(config.succeeding_sweep, Duration::from_secs(2));
        assert_eq!((config.key_provider)("abc", None), 3);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = CacheConfig::default().with_succeeding_sweep(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidSweepInterval { .. })
        ));
        assert!(CacheConfig::default()
            .with_first_sweep(Duration::ZERO)
            .validate()
            .is_ok());
    }
}
