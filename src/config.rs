//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides. Durations are written as whole milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Lifecycle manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Minimum notice, in hours, for delete and cancel.
    pub min_notice_hours: i64,
    /// How often the completion scheduler sweeps accepted contracts.
    #[serde(with = "duration_ms", rename = "autoCompleteIntervalMs")]
    pub auto_complete_interval: Duration,
    /// Maximum length of title and description, in characters.
    pub max_text_length: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_notice_hours: 72,
            auto_complete_interval: Duration::from_secs(60),
            max_text_length: 4096,
        }
    }
}

/// Notification hub settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubConfig {
    /// How long a poll may stay parked before resolving empty.
    #[serde(with = "duration_ms", rename = "pollTimeoutMs")]
    pub poll_timeout: Duration,
    /// Period of the expiry sweep for abandoned polls.
    #[serde(with = "duration_ms", rename = "sweepIntervalMs")]
    pub sweep_interval: Duration,
    /// Threads running re-evaluation passes.
    pub dispatch_workers: usize,
    /// Queued publish notifications before further ones are coalesced.
    pub publish_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_millis(250),
            dispatch_workers: 2,
            publish_queue_capacity: 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Lifecycle manager settings.
    pub lifecycle: LifecycleConfig,
    /// Notification hub settings.
    pub hub: HubConfig,
}

impl MarketConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Internal` if the document is malformed.
    pub fn from_json_str(json: &str) -> MarketResult<Self> {
        serde_json::from_str(json).map_err(|e| MarketError::internal(format!("invalid config: {e}")))
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Internal` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> MarketResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MarketError::internal(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
