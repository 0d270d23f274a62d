//! # Configuration
//!
//! [`FwaConfig`] gathers every tunable of the core: store retry bounds,
//! cache sizing and the shutdown grace period. It is loaded from a YAML
//! file, then selectively overridden from the environment:
//!
//! | variable                 | field                    |
//! |--------------------------|--------------------------|
//! | `FWA_DATABASE_URL`       | `store.database_url`     |
//! | `FWA_BLOB_ROOT`          | `store.blob_root`        |
//! | `FWA_CACHE_MEMORY_LIMIT` | `cache.memory_limit`     |
//!
//! Durations are written as humantime strings (`"1s"`, `"10m"`).
//! Every section has defaults, so an empty document is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const ENV_DATABASE_URL: &str = "FWA_DATABASE_URL";
const ENV_BLOB_ROOT: &str = "FWA_BLOB_ROOT";
const ENV_CACHE_MEMORY_LIMIT: &str = "FWA_CACHE_MEMORY_LIMIT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FwaConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub runtime: RuntimeConfig,
}

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Postgres connection string. `None` selects the in-memory metadata store.
    pub database_url: Option<String>,
    /// Root directory of the filesystem blob store. `None` keeps blobs in memory.
    pub blob_root: Option<PathBuf>,
    /// Attempts for a metadata insert that keeps hitting lock-wait timeouts.
    pub insert_tries_limit: u32,
    /// How long a metadata statement waits for a row lock.
    #[serde(with = "duration_str")]
    pub lock_timeout: Duration,
    /// First backoff delay of a blob operation; doubles on each retry.
    #[serde(with = "duration_str")]
    pub retry_initial_delay: Duration,
    /// Total time budget of a retried blob operation.
    #[serde(with = "duration_str")]
    pub retry_budget: Duration,
    /// Rows without `ts_upload` older than this are reconciled.
    #[serde(with = "duration_str")]
    pub reconcile_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            blob_root: None,
            insert_tries_limit: 60,
            lock_timeout: Duration::from_secs(5),
            retry_initial_delay: Duration::from_secs(1),
            retry_budget: Duration::from_secs(10 * 60),
            reconcile_grace: Duration::from_secs(60 * 60),
        }
    }
}

/// In-process cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Total byte budget of the content cache.
    pub memory_limit: u64,
    /// Largest single blob the content cache accepts.
    pub item_ceiling: u64,
    /// Lifetime of a content cache entry. `None` disables expiry.
    #[serde(with = "duration_str::option")]
    pub ttl: Option<Duration>,
    /// Number of resolved images kept by the accessor.
    pub outcome_capacity: usize,
    /// Total bytes of the resolved images kept by the accessor.
    pub outcome_memory_limit: u64,
    /// Lifetime of a cached resolution failure.
    #[serde(with = "duration_str")]
    pub negative_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: 1 << 30,
            item_ceiling: 64 << 20,
            ttl: Some(Duration::from_secs(10 * 60)),
            outcome_capacity: 256,
            outcome_memory_limit: 256 << 20,
            negative_ttl: Duration::from_secs(30),
        }
    }
}

/// Process lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// How long shutdown waits for background tasks before cancelling them.
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl FwaConfig {
    /// Parse a YAML document. Does not consult the environment.
    pub fn from_yaml_str(doc: &str) -> Result<Self, CoreError> {
        if doc.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(doc)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a YAML file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let doc = std::fs::read_to_string(path)?;
        let mut cfg = Self::from_yaml_str(&doc)?;
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Taking the lookup as a closure keeps tests independent of the
    /// process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.is_empty()) {
            self.store.database_url = Some(url);
        }
        if let Some(root) = lookup(ENV_BLOB_ROOT).filter(|v| !v.is_empty()) {
            self.store.blob_root = Some(PathBuf::from(root));
        }
        if let Some(limit) = lookup(ENV_CACHE_MEMORY_LIMIT).filter(|v| !v.is_empty()) {
            self.cache.memory_limit = limit.trim().parse().map_err(|e| {
                CoreError::Config(format!("{ENV_CACHE_MEMORY_LIMIT}={limit:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reject zero limits and inconsistent cache sizing.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.store.insert_tries_limit == 0 {
            return Err(CoreError::Config("store.insert_tries_limit must be > 0".into()));
        }
        if self.store.lock_timeout.is_zero() {
            return Err(CoreError::Config("store.lock_timeout must be > 0".into()));
        }
        if self.store.retry_initial_delay.is_zero() {
            return Err(CoreError::Config("store.retry_initial_delay must be > 0".into()));
        }
        if self.store.retry_budget < self.store.retry_initial_delay {
            return Err(CoreError::Config(
                "store.retry_budget must be >= store.retry_initial_delay".into(),
            ));
        }
        if self.store.reconcile_grace <= self.store.retry_budget {
            return Err(CoreError::Config(
                "store.reconcile_grace must be > store.retry_budget".into(),
            ));
        }
        if self.cache.memory_limit == 0 {
            return Err(CoreError::Config("cache.memory_limit must be > 0".into()));
        }
        if self.cache.item_ceiling == 0 {
            return Err(CoreError::Config("cache.item_ceiling must be > 0".into()));
        }
        if self.cache.outcome_capacity == 0 {
            return Err(CoreError::Config("cache.outcome_capacity must be > 0".into()));
        }
        if self.cache.outcome_memory_limit == 0 {
            return Err(CoreError::Config("cache.outcome_memory_limit must be > 0".into()));
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as a humantime string.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&humantime::format_duration(*d).to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|r| humantime::parse_duration(&r).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_defaults() {
        let cfg = FwaConfig::from_yaml_str("").unwrap();
        assert_eq!(cfg, FwaConfig::default());
        assert_eq!(cfg.store.insert_tries_limit, 60);
        assert_eq!(cfg.cache.item_ceiling, 64 << 20);
        assert_eq!(cfg.cache.ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_humantime_durations_parse() {
        let cfg = FwaConfig::from_yaml_str(
            "store:\n  retry_initial_delay: 250ms\n  retry_budget: 2m\ncache:\n  ttl: ~\n",
        )
        .unwrap();
        assert_eq!(cfg.store.retry_initial_delay, Duration::from_millis(250));
        assert_eq!(cfg.store.retry_budget, Duration::from_secs(120));
        assert_eq!(cfg.cache.ttl, None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = FwaConfig::from_yaml_str("store:\n  bogus: 1\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = FwaConfig::from_yaml_str("store:\n  insert_tries_limit: 0\n").unwrap_err();
        assert!(err.to_string().contains("insert_tries_limit"));
        let err = FwaConfig::from_yaml_str("cache:\n  memory_limit: 0\n").unwrap_err();
        assert!(err.to_string().contains("memory_limit"));
        let err = FwaConfig::from_yaml_str("cache:\n  outcome_memory_limit: 0\n").unwrap_err();
        assert!(err.to_string().contains("outcome_memory_limit"));
    }

    #[test]
    fn test_reconcile_grace_must_exceed_retry_budget() {
        let err = FwaConfig::from_yaml_str("store:\n  reconcile_grace: 5m\n").unwrap_err();
        assert!(err.to_string().contains("reconcile_grace"));
        let cfg = FwaConfig::from_yaml_str("store:\n  retry_budget: 1m\n  reconcile_grace: 5m\n")
            .unwrap();
        assert_eq!(cfg.store.reconcile_grace, Duration::from_secs(300));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FWA_DATABASE_URL", "postgres://fwa@localhost/fwa"),
            ("FWA_BLOB_ROOT", "/var/lib/fwa"),
            ("FWA_CACHE_MEMORY_LIMIT", "1048576"),
        ]
        .into_iter()
        .collect();
        let mut cfg = FwaConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(
            cfg.store.database_url.as_deref(),
            Some("postgres://fwa@localhost/fwa")
        );
        assert_eq!(cfg.store.blob_root, Some(PathBuf::from("/var/lib/fwa")));
        assert_eq!(cfg.cache.memory_limit, 1 << 20);
    }

    #[test]
    fn test_env_override_bad_number() {
        let mut cfg = FwaConfig::default();
        let err = cfg
            .apply_env_overrides(|k| (k == "FWA_CACHE_MEMORY_LIMIT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FWA_CACHE_MEMORY_LIMIT"));
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "runtime:\n  shutdown_grace: 5s").unwrap();
        let cfg = FwaConfig::load(f.path()).unwrap();
        assert_eq!(cfg.runtime.shutdown_grace, Duration::from_secs(5));
    }
}
