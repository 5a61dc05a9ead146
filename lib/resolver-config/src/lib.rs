pub mod data_loader;
pub mod dedupe;
pub mod log;
pub mod streaming;

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat, FileSourceFile};
use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};

use crate::{
    data_loader::DataLoaderConfig, dedupe::DedupeConfig, log::LoggingConfig,
    streaming::StreamingConfig,
};

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// The resolver logger configuration.
    ///
    /// The library does not install a subscriber, the embedding application builds one from it.
    #[serde(default)]
    pub log: LoggingConfig,

    /// Configuration of the per-execution data loader.
    #[serde(default)]
    pub data_loader: DataLoaderConfig,

    /// Configuration of the in-flight deduplication of data source calls.
    #[serde(default)]
    pub dedupe: DedupeConfig,

    /// Configuration of incremental (`@defer` / `@stream`) delivery.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Timeout applied to every single data source call.
    ///
    /// The request deadline (if any) still applies, whichever expires first wins.
    #[serde(default, with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub fetch_timeout: Option<Duration>,

    /// Upper bound of list items or fetches resolved concurrently at one level of the response.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            log: LoggingConfig::default(),
            data_loader: DataLoaderConfig::default(),
            dedupe: DedupeConfig::default(),
            streaming: StreamingConfig::default(),
            fetch_timeout: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    64
}

impl ResolverConfig {
    pub fn json_schema() -> Schema {
        schemars::schema_for!(ResolverConfig)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverConfigError {
    #[error("Failed to load configuration: {0}")]
    ConfigLoadError(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

static DEFAULT_FILE_NAMES: &[&str] = &[
    "resolver.config.yaml",
    "resolver.config.yml",
    "resolver.config.json",
    "resolver.config.json5",
];

static ENV_PREFIX: &str = "RESOLVER";

/// Loads the configuration from the given file, or from the first default file found in the
/// current directory, then applies `RESOLVER__`-prefixed environment variables on top.
pub fn load_config(config_path: Option<String>) -> Result<ResolverConfig, ResolverConfigError> {
    let mut config = Config::builder();

    if let Some(path) = config_path {
        let as_file: File<FileSourceFile, _> = PathBuf::from(path).into();
        config = config.add_source(as_file.required(true));
    } else {
        for name in DEFAULT_FILE_NAMES {
            config = config.add_source(File::with_name(name).required(false));
        }
    }

    config = config.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config = config.build()?.try_deserialize::<ResolverConfig>()?;
    validate(config)
}

pub fn parse_yaml_config(config_raw: &str) -> Result<ResolverConfig, ResolverConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(config_raw, FileFormat::Yaml))
        .build()?
        .try_deserialize::<ResolverConfig>()?;
    validate(config)
}

fn validate(config: ResolverConfig) -> Result<ResolverConfig, ResolverConfigError> {
    if config.max_concurrency == 0 {
        return Err(ResolverConfigError::InvalidConfig(
            "max_concurrency must be greater than 0".to_string(),
        ));
    }
    if config.fetch_timeout == Some(Duration::ZERO) {
        return Err(ResolverConfigError::InvalidConfig(
            "fetch_timeout must be greater than 0".to_string(),
        ));
    }
    tracing::debug!(
        data_loader = config.data_loader.enabled,
        dedupe = config.dedupe.enabled,
        max_concurrency = config.max_concurrency,
        "resolver configuration loaded"
    );
    Ok(config)
}
