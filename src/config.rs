//! Config file loading
//!
//! The config file defines named log sets and optional defaults:
//!
//! ```toml
//! [settings]
//! interval = "2s"
//! region = "eu-west-1"
//!
//! [sets.backend]
//! log_groups = [
//!     { alias = "api", name = "/aws/lambda/backend-api" },
//!     { alias = "worker", name = "/aws/lambda/backend-worker" },
//! ]
//! ```
//!
//! A `.json` file is read in the legacy layout, where the top-level object
//! maps set names directly to `{ "log_groups": [...] }`.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use cwtail_types::{LogSets, SourceSpec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("log set '{0}' not found in config file")]
    UnknownSet(String),

    #[error("log set '{0}' has no log groups")]
    EmptySet(String),

    #[error("invalid time '{0}': expected a duration such as 10m or 1h30m, or a timestamp")]
    InvalidTime(String),

    #[error("invalid duration '{0}': expected something like 500ms, 2s or 1h30m")]
    InvalidDuration(String),
}

/// Optional defaults that command-line flags override
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub interval: Option<String>,
    pub lookback: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogSetEntry {
    log_groups: Vec<LogGroupEntry>,
}

#[derive(Debug, Deserialize)]
struct LogGroupEntry {
    alias: Option<String>,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    sets: HashMap<String, LogSetEntry>,
}

/// Loaded configuration
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub settings: Settings,
    pub log_sets: LogSets,
    /// File the config came from (None if no file was found)
    pub path: Option<PathBuf>,
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cwtail").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(default) if default.exists() => default,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let mut config = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
        .map_err(|message| ConfigError::Parse {
            path: path.clone(),
            message,
        })?;

        tracing::debug!(path = %path.display(), "loaded config");
        config.path = Some(path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| e.to_string())?;
        Ok(Self {
            settings: file.settings,
            log_sets: into_log_sets(file.sets),
            path: None,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let sets: HashMap<String, LogSetEntry> =
            serde_json::from_str(content).map_err(|e| e.to_string())?;
        Ok(Self {
            settings: Settings::default(),
            log_sets: into_log_sets(sets),
            path: None,
        })
    }

    /// Sources of a named set, in configured order
    pub fn log_set(&self, name: &str) -> Result<Vec<SourceSpec>, ConfigError> {
        let sources = self
            .log_sets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSet(name.to_string()))?;
        if sources.is_empty() {
            return Err(ConfigError::EmptySet(name.to_string()));
        }
        Ok(sources.to_vec())
    }
}

fn into_log_sets(sets: HashMap<String, LogSetEntry>) -> LogSets {
    LogSets::new(
        sets.into_iter()
            .map(|(name, entry)| {
                let sources = entry
                    .log_groups
                    .into_iter()
                    .map(|group| match group.alias {
                        Some(alias) => SourceSpec::new(alias, group.name),
                        None => SourceSpec::named(group.name),
                    })
                    .collect();
                (name, sources)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_sets_and_settings() {
        let config = Config::from_toml(
            r#"
            [settings]
            interval = "2s"

            [sets.backend]
            log_groups = [
                { alias = "api", name = "/aws/lambda/api" },
                { name = "/aws/lambda/worker" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.settings.interval.as_deref(), Some("2s"));
        let sources = config.log_set("backend").unwrap();
        assert_eq!(
            sources,
            vec![
                SourceSpec::new("api", "/aws/lambda/api"),
                SourceSpec::named("/aws/lambda/worker"),
            ]
        );
    }

    #[test]
    fn test_parse_legacy_json() {
        let config = Config::from_json(
            r#"{"backend": {"log_groups": [{"alias": "api", "name": "/aws/lambda/api"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            config.log_set("backend").unwrap(),
            vec![SourceSpec::new("api", "/aws/lambda/api")]
        );
    }

    #[test]
    fn test_unknown_and_empty_sets() {
        let config = Config::from_toml("[sets.empty]\nlog_groups = []\n").unwrap();
        assert!(matches!(config.log_set("nope"), Err(ConfigError::UnknownSet(_))));
        assert!(matches!(config.log_set("empty"), Err(ConfigError::EmptySet(_))));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(Config::from_toml("[sets.x]\nlog_groups = 3\n").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/cwtail.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
