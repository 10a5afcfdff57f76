//! Configuration file model and loader.
//!
//! The config document lives at `bms-api.{yml,yaml,json}` under `$HOME`,
//! `/etc`, or `/`. Watching the file for changes is handled outside the core;
//! this module only loads documents and exposes the pieces other components
//! re-apply on reload (probe list, broadcast filters).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::probe::ProbeSpec;

/// Base name of the config document, without extension.
pub const CONFIG_BASENAME: &str = "bms-api";

/// Default debounce window for namespace recomputation.
pub const DEFAULT_NOTIFICATION_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found (searched {0})")]
    NotFound(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do with entities matched by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// Hide the entity entirely: no broadcasts, no listings.
    Ignore,
    /// Keep the entity visible but suppress its broadcasts.
    Mute,
}

/// A broadcast suppression rule. Empty fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub action: FilterAction,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

impl Filter {
    pub fn is_ignore(&self) -> bool {
        self.action == FilterAction::Ignore
    }

    /// True when every non-empty field equals the entity's, ignoring case.
    pub fn matches(&self, kind: &str, namespace: &str, name: &str) -> bool {
        let field_matches =
            |want: &str, have: &str| want.is_empty() || want.eq_ignore_ascii_case(have);
        field_matches(&self.kind, kind)
            && field_matches(&self.namespace, namespace)
            && field_matches(&self.name, name)
    }
}

/// The config document.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Namespace used by external persistence.
    pub namespace: String,
    /// Tenant environment suffixes; empty means the built-in set.
    pub environments: Vec<String>,
    pub filters: Vec<Filter>,
    pub urls: Vec<ProbeSpec>,
    /// Debounce window for namespace recompute emission, e.g. "250ms".
    pub notification_delay: Option<String>,
}

impl Config {
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            "bms"
        } else {
            &self.namespace
        }
    }

    pub fn notification_delay(&self) -> Duration {
        self.notification_delay
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_NOTIFICATION_DELAY)
    }

    /// The locations probed for a config document, in order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(home) = dirs::home_dir() {
            dirs.push(home);
        }
        dirs.push(PathBuf::from("/etc"));
        dirs.push(PathBuf::from("/"));

        let mut paths = Vec::new();
        for dir in dirs {
            for ext in ["yml", "yaml", "json"] {
                paths.push(dir.join(format!("{CONFIG_BASENAME}.{ext}")));
            }
        }
        paths
    }

    /// Find and load the config document from the standard locations.
    pub fn load() -> Result<(Config, PathBuf), ConfigError> {
        let searched = Self::search_paths();
        for path in &searched {
            if path.is_file() {
                debug!("Loading config file at {}", path.display());
                let config = Self::load_from(path)?;
                return Ok((config, path.clone()));
            }
        }

        let dirs = searched
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::NotFound(dirs))
    }

    /// Load a specific config file; the parser follows the extension.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }
}

/// Parse duration strings of the form "250ms", "30s", "5m", "1h".
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_config(ext: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{ext}"))
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_config() {
        let file = temp_config(
            "yml",
            r#"
namespace: ops
environments: [dev, prod]
notification_delay: 500ms
filters:
  - action: mute
    kind: deployment
    name: noisy
urls:
  - name: portal
    url: https://portal.example.com/
"#,
        );

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.namespace(), "ops");
        assert_eq!(config.environments, vec!["dev", "prod"]);
        assert_eq!(config.notification_delay(), Duration::from_millis(500));
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.urls.len(), 1);
        assert_eq!(config.urls[0].name, "portal");
    }

    #[test]
    fn test_load_json_config() {
        let file = temp_config("json", r#"{"namespace": "ops", "urls": []}"#);
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.namespace(), "ops");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.namespace(), "bms");
        assert_eq!(config.notification_delay(), DEFAULT_NOTIFICATION_DELAY);
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_invalid_yaml_errors() {
        let file = temp_config("yml", "namespace: [unterminated");
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("nope"), None);
        assert_eq!(parse_duration("10"), None);
    }

    #[test]
    fn test_filter_matching() {
        let filter = Filter {
            action: FilterAction::Mute,
            kind: "Deployment".to_string(),
            namespace: String::new(),
            name: "noisy".to_string(),
        };

        assert!(filter.matches("deployment", "any-ns", "noisy"));
        assert!(filter.matches("deployment", "", "NOISY"));
        assert!(!filter.matches("deployment", "ns", "other"));
        assert!(!filter.matches("pod", "ns", "noisy"));
    }
}
