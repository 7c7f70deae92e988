//! Configuration management.
//!
//! Configuration is read from `~/.config/telefeed/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot API token used for deliveries. Empty means dry runs only.
    pub bot_token: String,

    /// Database file override; defaults to the platform data directory.
    pub database: Option<PathBuf>,

    /// Seconds between scheduler ticks in daemon mode.
    pub tick_interval_secs: u64,

    /// Keep an archive of extracted posts. Digests and quiet-hour
    /// rehydration depend on it.
    pub archive_posts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            database: None,
            tick_interval_secs: 5,
            archive_posts: true,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/telefeed/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("telefeed").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let default_config = Self::default_config_content();

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(default_config.as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Telefeed Configuration

# Bot API token used to deliver posts. Get one from @BotFather.
# Deliveries are skipped while this is empty.
bot_token = ""

# Database file location. Defaults to the platform data directory
# (e.g. ~/.local/share/telefeed/telefeed.db) when unset.
# database = "/var/lib/telefeed/telefeed.db"

# Seconds between scheduler ticks in daemon mode.
tick_interval_secs = 5

# Keep an archive of every extracted post. Digest batches and
# quiet-hour catch-up read from this archive, so disabling it
# degrades both to link-only deliveries.
archive_posts = true
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.tick_interval_secs, 5);
        assert!(config.archive_posts);
        assert!(config.bot_token.is_empty());
        assert!(config.database.is_none());
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
bot_token = "123:abc"
archive_posts = false
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.bot_token, "123:abc");
        assert!(!config.archive_posts);
        // Default value
        assert_eq!(config.tick_interval_secs, 5);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.tick_interval_secs, 5);
        assert!(config.archive_posts);
    }
}
