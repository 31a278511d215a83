use serde::Deserialize;
use std::path::Path;

/// Settings for the ring tooling (the probe binary). The protocol core
/// never reads configuration; everything here is defaulted so an empty
/// file is valid.
#[derive(Deserialize, Debug)]
pub struct BusConfig {
    #[serde(default = "defaults::bus_path")]
    pub bus_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::element_size")]
    pub element_size: u32,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn bus_path() -> String {
        "/tmp/basalt_bus".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn element_size() -> u32 {
        56
    }

    pub fn capacity() -> usize {
        1 << 14 // 16384
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            bus_path: defaults::bus_path(),
            log_level: defaults::log_level(),
            element_size: defaults::element_size(),
            capacity: defaults::capacity(),
        }
    }
}

impl BusConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: BusConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}
