use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(deny_unknown_fields)]
pub struct DataLoaderConfig {
    /// Enables/disables the data loader.
    ///
    /// When enabled, fetches nested below lists are executed once per buffer id for all list
    /// items (concurrently, or as one batch for batch fetches) instead of once per item.
    #[serde(default = "default_data_loader_enabled")]
    pub enabled: bool,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            enabled: default_data_loader_enabled(),
        }
    }
}

fn default_data_loader_enabled() -> bool {
    true
}
