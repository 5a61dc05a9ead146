use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `tracing` target prefix of every span and event the resolver emits.
pub const RESOLVER_LOG_TARGET: &str = "hive_router_plan_resolver";

/// Verbosity of the resolver's own spans and events.
///
/// The resolver never installs a subscriber. The embedding application passes
/// [`LoggingConfig::env_filter`] to the one it builds.
#[derive(Debug, Deserialize, Serialize, JsonSchema, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level enabled for the resolver target.
    #[serde(default)]
    pub level: LogLevel,

    /// Further env-filter directives, e.g. `tokio=warn`, appended after the resolver's own.
    #[serde(default)]
    pub directives: Vec<String>,
}

impl LoggingConfig {
    pub fn env_filter(&self) -> String {
        let mut filter = format!("{}={}", RESOLVER_LOG_TARGET, self.level.as_str());
        for directive in &self.directives {
            filter.push(',');
            filter.push_str(directive);
        }
        filter
    }
}

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every fetch, loader dispatch and null propagation.
    Trace,
    Debug,
    #[default]
    Info,
    /// Failed data source calls and panicking hooks.
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
