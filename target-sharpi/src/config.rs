use serde::Deserialize;
use shared::logging::LoggingConfig;
use shared::metrics::MetricsConfig;
use sharpi::config::{Config as SharpiConfig, ValidationError};
use std::fs::File;
use std::path::Path;

#[derive(Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub sharpi: SharpiConfig,
    pub logging: Option<LoggingConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    /// Loads the target config. JSON files, as most Singer runners write them, parse too.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.sharpi.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
