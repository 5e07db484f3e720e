use std::fs;
use std::path::{Path, PathBuf};

use extentdb::storage::StoreConfig;
use thiserror::Error;

/// Store settings read from the CLI config file.
#[derive(Debug, Default)]
pub struct CliConfig {
    pub path: Option<PathBuf>,
    pub store: StoreConfig,
}

impl CliConfig {
    /// Reads `explicit`, or the default path when it exists.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file yields the default configuration.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let store = read_file(&path)?;
            return Ok(Self {
                path: Some(path),
                store,
            });
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                let store = read_file(&path)?;
                Ok(Self {
                    path: Some(path),
                    store,
                })
            }
            _ => Ok(Self::default()),
        }
    }
}

fn read_file(path: &Path) -> Result<StoreConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("extentdb").join("config.toml"))
}
