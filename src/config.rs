//! Configuration for the catalog client
//!
//! Loaded from TOML. Every section has defaults, so an absent file or an
//! absent section is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const APP_DIR: &str = "anime-shelf";
pub const DEFAULT_CHANNEL: &str = "anime-changed";
pub const DEFAULT_SHIKIMORI_PREFIX: &str = "https://shikimori.one/animes/";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub notifier: NotifierConfig,
    pub images: ImageConfig,
}

/// Local catalog backend and rating scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// SQLite file. Defaults to `<data_dir>/anime-shelf/catalog.db`
    pub db_path: Option<PathBuf>,
    /// Upper bound of the rating scale (5 for stars, 10 for numeric forms)
    pub score_max: u8,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            score_max: 5,
        }
    }
}

/// Cross-window change channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub channel: String,
    /// Events buffered per subscriber before it starts lagging
    pub capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            capacity: 64,
        }
    }
}

/// Poster fetching and caching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Links must start with one of these to be fetched
    pub allowed_prefixes: Vec<String>,
    pub request_timeout_secs: u64,
    /// Decoded posters kept for instant re-display
    pub recent_capacity: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec![DEFAULT_SHIKIMORI_PREFIX.to_string()],
            request_timeout_secs: 20,
            recent_capacity: 16,
        }
    }
}

/// Closed rating range `0..=max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreScale {
    max: u8,
}

impl ScoreScale {
    pub const STARS: ScoreScale = ScoreScale { max: 5 };
    pub const NUMERIC: ScoreScale = ScoreScale { max: 10 };

    pub fn new(max: u8) -> Self {
        Self { max }
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn contains(&self, score: u8) -> bool {
        score <= self.max
    }
}

impl Config {
    /// Parse configuration from a TOML string and validate it
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Load `<config_dir>/anime-shelf/config.toml` if present, defaults otherwise
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Where the SQLite catalog lives:
    /// - Linux: ~/.local/share/anime-shelf/catalog.db
    /// - macOS: ~/Library/Application Support/anime-shelf/catalog.db
    /// - Windows: %APPDATA%\anime-shelf\catalog.db
    pub fn db_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.catalog.db_path {
            return Some(path.clone());
        }
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join(APP_DIR).join("catalog.db"))
    }

    pub fn score_scale(&self) -> ScoreScale {
        ScoreScale::new(self.catalog.score_max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.score_max == 0 {
            return Err(ConfigError::OutOfRange(
                "catalog.score_max must be positive".to_string(),
            ));
        }
        if self.notifier.capacity == 0 {
            return Err(ConfigError::OutOfRange(
                "notifier.capacity must be positive".to_string(),
            ));
        }
        if self.images.recent_capacity == 0 {
            return Err(ConfigError::OutOfRange(
                "images.recent_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.score_scale(), ScoreScale::STARS);
        assert_eq!(config.notifier.channel, DEFAULT_CHANNEL);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("[catalog]\nscore_max = 10\n").unwrap();
        assert_eq!(config.score_scale(), ScoreScale::NUMERIC);
        assert_eq!(config.notifier.capacity, 64);
        assert_eq!(config.images.allowed_prefixes, vec![DEFAULT_SHIKIMORI_PREFIX]);
    }

    #[test]
    fn test_zero_scale_rejected() {
        let err = Config::from_toml("[catalog]\nscore_max = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[catalog]\ndb_path = \"/tmp/shelf.db\"").unwrap();
        writeln!(file, "[notifier]\nchannel = \"test\"\ncapacity = 8").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.db_path(), Some(PathBuf::from("/tmp/shelf.db")));
        assert_eq!(config.notifier.channel, "test");
        assert_eq!(config.notifier.capacity, 8);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/anime-shelf.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_score_scale_bounds() {
        assert!(ScoreScale::STARS.contains(0));
        assert!(ScoreScale::STARS.contains(5));
        assert!(!ScoreScale::STARS.contains(6));
        assert!(ScoreScale::NUMERIC.contains(10));
    }
}
