use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(deny_unknown_fields)]
pub struct DedupeConfig {
    /// Enables/disables deduplication of in-flight data source calls.
    ///
    /// When two fetches render exactly the same input for the same data source (and the
    /// fingerprinted headers match) while the first one is still running, the second one
    /// shares the response of the first.
    #[serde(default = "default_dedupe_enabled")]
    pub enabled: bool,

    /// Request headers taken into account when fingerprinting a call.
    ///
    /// If not provided, the default is to use the "authorization" header only.
    #[serde(default = "default_fingerprint_headers")]
    pub fingerprint_headers: Vec<String>,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            enabled: default_dedupe_enabled(),
            fingerprint_headers: default_fingerprint_headers(),
        }
    }
}

fn default_dedupe_enabled() -> bool {
    true
}

fn default_fingerprint_headers() -> Vec<String> {
    vec!["authorization".to_string()]
}
