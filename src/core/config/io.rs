use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path_display(path), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path_display(path), source)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "streamscribe", "streamscribe")
}

impl Config {
    /// Loads the config file from the platform config directory, falling back
    /// to defaults when there is none.
    pub fn load() -> Result<Config, Box<dyn StdError>> {
        match Self::get_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from_path(config_path: &Path) -> Result<Config, Box<dyn StdError>> {
        if !config_path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };

        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file
            .persist(config_path)
            .map_err(|err| -> Box<dyn StdError> { Box::new(err) })?;
        Ok(())
    }

    pub fn get_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Where transcripts are written: `storage_dir` if set, else `chats/`
    /// under the platform data directory.
    pub fn resolved_storage_dir(&self) -> Option<PathBuf> {
        self.storage_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("chats")))
    }
}
