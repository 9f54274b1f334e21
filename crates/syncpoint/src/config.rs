//! Configuration for a Syncpoint deployment.
//!
//! Every tunable (matching tolerance, verify retry policy, scheduler
//! cadences) is a configuration value with a default; nothing is
//! hard-coded. Loaded from TOML:
//!
//! ```toml
//! store_path = "data/groups.json"
//!
//! [matcher]
//! tolerance_secs = 300
//!
//! [verify]
//! max_attempts = 10
//! initial_delay_ms = 500
//! max_delay_ms = 15000
//! backoff_multiplier = 2.0
//!
//! [scheduler]
//! tick_interval_secs = 60
//! cadence_full_secs = 86400
//! cadence_incremental_secs = 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use syncpoint_common::{Error, Result};
use syncpoint_restore::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncpointConfig {
    /// Location of the consistency group store document
    pub store_path: PathBuf,
    pub matcher: MatcherConfig,
    pub verify: VerifyConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum skew, in seconds, for artifacts to share a group
    pub tolerance_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub cadence_full_secs: u64,
    pub cadence_incremental_secs: u64,
}

impl Default for SyncpointConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/groups.json"),
            matcher: MatcherConfig::default(),
            verify: VerifyConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { tolerance_secs: 300 }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 15_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            cadence_full_secs: 86_400,
            cadence_incremental_secs: 3_600,
        }
    }
}

impl SyncpointConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.matcher.tolerance_secs == 0 {
            return Err(Error::Configuration(
                "matcher.tolerance_secs must be positive".to_string(),
            ));
        }
        if self.verify.max_attempts == 0 {
            return Err(Error::Configuration(
                "verify.max_attempts must be positive".to_string(),
            ));
        }
        if self.verify.backoff_multiplier < 1.0 {
            return Err(Error::Configuration(
                "verify.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(Error::Configuration(
                "scheduler.tick_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.matcher.tolerance_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.verify.max_attempts,
            initial_delay: Duration::from_millis(self.verify.initial_delay_ms),
            max_delay: Duration::from_millis(self.verify.max_delay_ms),
            backoff_multiplier: self.verify.backoff_multiplier,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn cadence_full(&self) -> Duration {
        Duration::from_secs(self.scheduler.cadence_full_secs)
    }

    pub fn cadence_incremental(&self) -> Duration {
        Duration::from_secs(self.scheduler.cadence_incremental_secs)
    }
}
