use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    /// How long resolved patches of an incremental response are buffered before they are
    /// flushed to the client as one JSON array.
    ///
    /// `0ms` flushes every patch as soon as it is resolved.
    #[serde(
        default = "default_flush_interval",
        deserialize_with = "humantime_serde::deserialize",
        serialize_with = "humantime_serde::serialize"
    )]
    #[schemars(with = "String")]
    pub flush_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
        }
    }
}

fn default_flush_interval() -> Duration {
    Duration::ZERO
}
