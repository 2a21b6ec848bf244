use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigLoadError;

/// Where the effective settings were read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SettingsSource {
    /// Built-in defaults.
    #[default]
    Default,
    /// File named by `OCTOPOES_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// JSON held in `OCTOPOES_CONFIG_JSON`.
    EnvInline,
    /// A config file found in the working directory.
    File(PathBuf),
}

/// Connection to the bitemporal document store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct XtdbSettings {
    /// Base URL of the XTDB multinode HTTP API.
    pub url: String,
    /// Node the engine reads and writes. Each client owns one node.
    pub client: String,
    /// Per-request timeout (ms) for store round trips, including the wait
    /// for a submitted transaction to be indexed.
    pub request_timeout_ms: u64,
}

impl Default for XtdbSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            client: "_dev".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl XtdbSettings {
    /// [`Self::request_timeout_ms`] as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Message broker used to fan change events out to workers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Redis URL.
    pub url: String,
    /// Queue that receives `handle_event_batch` tasks.
    pub event_queue: String,
    /// Events buffered before a synchronous flush.
    pub batch_size: usize,
    /// Longest time (ms) an event waits in the buffer.
    pub flush_interval_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            event_queue: "octopoes".to_string(),
            batch_size: 50,
            flush_interval_ms: 1_000,
        }
    }
}

impl BrokerSettings {
    /// [`Self::flush_interval_ms`] as a duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Overrides for the default enablement of inference bits.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BitSettings {
    /// Bits to run even though they are off by default.
    pub enabled: BTreeSet<String>,
    /// Bits never to run. Wins over `enabled`.
    pub disabled: BTreeSet<String>,
}

impl BitSettings {
    /// A listed-disabled bit is always off; otherwise it runs when enabled
    /// by default or listed as enabled.
    pub fn is_enabled(&self, bit_id: &str, default_enabled: bool) -> bool {
        if self.disabled.contains(bit_id) {
            return false;
        }
        default_enabled || self.enabled.contains(bit_id)
    }
}

/// Everything the engine and worker need at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Document store connection.
    pub xtdb: XtdbSettings,
    /// Event broker connection and batching.
    pub broker: BrokerSettings,
    /// Bit enablement overrides.
    pub bits: BitSettings,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            xtdb: XtdbSettings::default(),
            broker: BrokerSettings::default(),
            bits: BitSettings::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Checks that both URLs parse and that no required value is empty or
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        Url::parse(&self.xtdb.url).map_err(|source| {
            ConfigLoadError::InvalidUrl {
                field: "xtdb",
                source,
            }
        })?;
        Url::parse(&self.broker.url).map_err(|source| {
            ConfigLoadError::InvalidUrl {
                field: "broker",
                source,
            }
        })?;

        if self.xtdb.client.trim().is_empty() {
            return Err(ConfigLoadError::Invalid(
                "xtdb.client must not be empty".into(),
            ));
        }
        if self.broker.batch_size == 0 {
            return Err(ConfigLoadError::Invalid(
                "broker.batch_size must be at least 1".into(),
            ));
        }
        if self.broker.flush_interval_ms == 0 {
            return Err(ConfigLoadError::Invalid(
                "broker.flush_interval_ms must be positive".into(),
            ));
        }

        if let Some(bit) = self.bits.enabled.intersection(&self.bits.disabled).next() {
            return Err(ConfigLoadError::Invalid(format!(
                "bit {bit} is listed as both enabled and disabled"
            )));
        }

        Ok(())
    }
}
