use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use nodetape::types::ScalarKind;
use serde::Deserialize;
use thiserror::Error;

/// Layout and open settings stored under a profile name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub region: Option<PathBuf>,
    pub dimensions: Option<usize>,
    pub scalar: Option<ScalarKind>,
    pub connectivity: Option<usize>,
    pub nodes: Option<usize>,
    pub id_bytes: Option<usize>,
    pub header_bytes: Option<usize>,
    pub max_tracked_level: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    data: RawConfig,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        if let Some(name) = data.default_profile.as_ref() {
            if !data.profiles.contains_key(name) {
                return Err(ConfigError::ProfileNotFound { name: name.clone() });
            }
        }
        Ok(Self { data })
    }

    /// Profile named `name`, else the configured default, else none.
    pub fn select(&self, name: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        match name.or(self.data.default_profile.as_deref()) {
            Some(name) => self
                .data
                .profiles
                .get(name)
                .map(Some)
                .ok_or_else(|| ConfigError::ProfileNotFound {
                    name: name.to_string(),
                }),
            None => Ok(None),
        }
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    profiles: HashMap<String, Profile>,
    #[serde(default)]
    default_profile: Option<String>,
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
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("nodetape").join("cli.toml"))
}
