//! Configuration and store handle shared by every command.
//!
//! The config comes from `--config`, `$PHONEDIR_CONFIG`, or
//! `<PHONEDIR_HOME>/config.toml`, in that order. `--root` overrides the
//! configured root and is enough on its own when no config file exists.

use crate::cli::error::HelpfulError;
use anyhow::Context;
use phonedir::{DirectoryConfig, DirectoryStore};
use phonedir_logging::default_config_path;
use std::path::{Path, PathBuf};

pub struct CliContext {
    pub config: DirectoryConfig,
    pub config_path: PathBuf,
    /// Whether `config_path` existed when loaded.
    pub config_found: bool,
    pub json: bool,
}

impl CliContext {
    pub fn load(
        config_path: Option<PathBuf>,
        root: Option<PathBuf>,
        json: bool,
    ) -> anyhow::Result<Self> {
        let explicit = config_path.is_some();
        let config_path = config_path.unwrap_or_else(default_config_path);
        let config_found = config_path.exists();

        let mut config = if config_found {
            DirectoryConfig::load(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?
        } else if explicit {
            return Err(HelpfulError::file_not_found(&config_path).into());
        } else {
            match &root {
                Some(root) => DirectoryConfig::new(root),
                None => return Err(HelpfulError::no_root(&config_path).into()),
            }
        };
        if let Some(root) = root {
            config.root = absolute(&root)?;
        }

        Ok(Self {
            config,
            config_path,
            config_found,
            json,
        })
    }

    pub fn open_store(&self) -> anyhow::Result<DirectoryStore> {
        DirectoryStore::open(self.config.clone()).map_err(|err| {
            anyhow::Error::from(
                HelpfulError::from_store("Open directory", err)
                    .with_context(format!("Root: {}", self.config.root.display())),
            )
        })
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
