//! Configuration for the directory store

use crate::lock::LockMode;
use phonedir_protocol::LinkBuilder;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("Cannot serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Store configuration, usually loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory holding `MainMenu.xml`. Must be absolute.
    pub root: PathBuf,

    /// Prefix of every menu item URL the phones will fetch
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Title written when MainMenu.xml has to be created
    #[serde(default = "default_main_menu_title")]
    pub main_menu_title: String,

    /// Display name of the catch-all zone and locality
    #[serde(default = "default_missing_zone_name")]
    pub missing_zone_name: String,

    #[serde(default)]
    pub lock_mode: LockMode,

    /// How long a writer waits for a record lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Feed attribute → locality routing
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
}

/// Routes directory-sync records carrying `attribute` to a locality.
///
/// `zone`, `branch` and `locality` accept either ids or display names. The
/// locality is created under `zone` (or `branch`) when it does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub attribute: String,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub locality: String,
}

fn default_base_url() -> String {
    "http://localhost/phonedir".to_string()
}

fn default_main_menu_title() -> String {
    "Directorio".to_string()
}

fn default_missing_zone_name() -> String {
    "Missing Extensions From Feed".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

impl DirectoryConfig {
    /// Defaults for everything but the root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: default_base_url(),
            main_menu_title: default_main_menu_title(),
            missing_zone_name: default_missing_zone_name(),
            lock_mode: LockMode::default(),
            lock_timeout_ms: default_lock_timeout_ms(),
            mappings: Vec::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DirectoryConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "root must be an absolute path, got {}",
                self.root.display()
            )));
        }
        if self
            .root
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ConfigError::Invalid(format!(
                "root may not contain '..': {}",
                self.root.display()
            )));
        }
        LinkBuilder::new(&self.base_url).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.main_menu_title.trim().is_empty() {
            return Err(ConfigError::Invalid("main_menu_title is empty".to_string()));
        }
        if self.missing_zone_name.trim().is_empty() {
            return Err(ConfigError::Invalid("missing_zone_name is empty".to_string()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        for rule in &self.mappings {
            if rule.attribute.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "mapping to '{}' has an empty attribute",
                    rule.locality
                )));
            }
            if rule.locality.trim().is_empty() || rule.zone.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "mapping for '{}' needs both zone and locality",
                    rule.attribute
                )));
            }
        }
        Ok(())
    }

    /// First mapping whose attribute matches, ignoring case and surrounding
    /// whitespace.
    pub fn mapping_for(&self, attribute: &str) -> Option<&MappingRule> {
        let wanted = attribute.trim();
        self.mappings
            .iter()
            .find(|rule| rule.attribute.trim().eq_ignore_ascii_case(wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: DirectoryConfig = toml::from_str("root = \"/srv/phones\"").unwrap();
        assert_eq!(config.base_url, "http://localhost/phonedir");
        assert_eq!(config.main_menu_title, "Directorio");
        assert_eq!(config.missing_zone_name, "Missing Extensions From Feed");
        assert_eq!(config.lock_mode, LockMode::Process);
        assert_eq!(config.lock_timeout_ms, 10_000);
        assert!(config.mappings.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = DirectoryConfig::new("/srv/phones");
        config.lock_mode = LockMode::Os;
        config.mappings.push(MappingRule {
            attribute: "PUJ-FRONT".to_string(),
            zone: "zona-este".to_string(),
            branch: None,
            locality: "Bavaro".to_string(),
        });
        config.save(&path).unwrap();

        let loaded = DirectoryConfig::load(&path).unwrap();
        assert_eq!(loaded.root, PathBuf::from("/srv/phones"));
        assert_eq!(loaded.lock_mode, LockMode::Os);
        assert_eq!(loaded.mappings, config.mappings);
    }

    #[test]
    fn test_validate_rejects_relative_root() {
        let config = DirectoryConfig::new("phones");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = DirectoryConfig::new("/srv/../etc");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = DirectoryConfig::new("/srv/phones");
        config.base_url = "phones".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mapping_lookup_ignores_case() {
        let mut config = DirectoryConfig::new("/srv/phones");
        config.mappings.push(MappingRule {
            attribute: "puj-front".to_string(),
            zone: "zona-este".to_string(),
            branch: Some("centro".to_string()),
            locality: "bavaro".to_string(),
        });
        assert!(config.mapping_for(" PUJ-Front ").is_some());
        assert!(config.mapping_for("sdq").is_none());
    }
}
