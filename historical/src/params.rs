use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning of the historical round lookup batching.
///
/// Field names on the JSON surface match the ones used by the rest of the client configuration.
/// Absent fields fall back to [Params::default].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Number of pending lookups above which a batch is sent immediately.
    #[serde(rename = "MaxHistoricalRounds")]
    pub max_batch_size: usize,

    /// Maximum time the oldest pending lookup waits before a batch is sent.
    #[serde(rename = "HistoricalRoundsPeriod", with = "nanos")]
    pub batch_period: Duration,

    /// Number of lookups that can be queued before new ones are rejected.
    #[serde(rename = "HistoricalRoundsBufferLen")]
    pub queue_capacity: usize,

    /// Number of times a round may be reported missing before the lookup fails.
    #[serde(rename = "MaxHistoricalRoundsRetries")]
    pub max_retries: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            batch_period: Duration::from_millis(100),
            queue_capacity: 1_000,
            max_retries: 3,
        }
    }
}

impl Params {
    /// Parse parameters from a JSON object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize parameters to a JSON object.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Durations are encoded as integer nanoseconds.
mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}
