//! Helpers shared by the agent and server configuration layers.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid duration {0:?}")]
    Duration(String),
}

/// Loads a config file. `.toml` files are read as TOML, anything else as JSON.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    };
    if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| parse_err(e.to_string()))
    } else {
        serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))
    }
}

/// A duration as written in a config file: bare seconds or `"10s"`-style text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Secs(u64),
    Text(String),
}

impl DurationValue {
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Secs(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

/// Parses `"500ms"`, `"10s"`, `"2m"`, `"1h"` or a bare number of seconds.
///
/// # Examples
///
/// ```
/// use pulsemon_common::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
/// ```
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| ConfigError::Duration(text.to_string()))?;
    let secs = |factor: u64| {
        n.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Duration(text.to_string()))
    };
    match unit {
        "" | "s" => Ok(Duration::from_secs(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(ConfigError::Duration(text.to_string())),
    }
}
