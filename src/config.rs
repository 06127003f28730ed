// Configuration management for semgraph

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheCategory;
use crate::error::{Error, Result};

/// Name of the per-project configuration file
pub const CONFIG_FILE_NAME: &str = ".semgraph.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub patterns: PatternConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

/// Cache construction options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the main cache, in entries. Category caches take a fraction of it.
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub compression_enabled: bool,
    pub compression_threshold_bytes: usize,
    pub stats_enabled: bool,
    /// Number of recent operations the average access time is computed over
    pub access_time_window: usize,
    pub categories: CategoriesConfig,
}

/// Per-category sub-cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    pub pattern: CategoryConfig,
    pub search: CategoryConfig,
    pub symbol: CategoryConfig,
    pub analysis: CategoryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub capacity_fraction: f64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub confidence_threshold: f64,
    pub max_results: usize,
    pub cache_ttl_secs: u64,
    pub local_cache_ttl_secs: u64,
    pub local_cache_capacity: usize,
    /// Register the built-in catalog at construction
    pub load_builtin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    /// Minimum name similarity for a fuzzy candidate (exclusive)
    pub fuzzy_threshold: f64,
    pub similarity_threshold: f64,
    pub cache_ttl_secs: u64,
    pub local_cache_ttl_secs: u64,
    pub local_cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl_secs: 3600,
            cleanup_interval_secs: 300,
            compression_enabled: false,
            compression_threshold_bytes: 10 * 1024,
            stats_enabled: true,
            access_time_window: 100,
            categories: CategoriesConfig::default(),
        }
    }
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            pattern: CategoryConfig { capacity_fraction: 0.25, ttl_secs: 20 * 60 },
            search: CategoryConfig { capacity_fraction: 0.25, ttl_secs: 10 * 60 },
            symbol: CategoryConfig { capacity_fraction: 0.20, ttl_secs: 30 * 60 },
            analysis: CategoryConfig { capacity_fraction: 0.10, ttl_secs: 15 * 60 },
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self { capacity_fraction: 0.25, ttl_secs: 600 }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_results: 100,
            cache_ttl_secs: 20 * 60,
            local_cache_ttl_secs: 60,
            local_cache_capacity: 256,
            load_builtin: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 100,
            fuzzy_threshold: 0.6,
            similarity_threshold: 0.7,
            cache_ttl_secs: 10 * 60,
            local_cache_ttl_secs: 30,
            local_cache_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl CacheConfig {
    /// Settings for one category sub-cache
    pub fn category(&self, category: CacheCategory) -> CategoryConfig {
        match category {
            CacheCategory::Pattern => self.categories.pattern,
            CacheCategory::Search => self.categories.search,
            CacheCategory::Symbol => self.categories.symbol,
            CacheCategory::Analysis => self.categories.analysis,
        }
    }

    /// Entry capacity of a category sub-cache (never below one)
    pub fn category_capacity(&self, category: CacheCategory) -> usize {
        let fraction = self.category(category).capacity_fraction;
        ((self.max_entries as f64 * fraction).floor() as usize).max(1)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .semgraph.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_FILE_NAME);

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Cache
        if self.cache.max_entries == 0 {
            return Err(Error::Config("Cache max_entries must be greater than 0".into()));
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err(Error::Config("Cache cleanup interval must be greater than 0".into()));
        }
        if self.cache.access_time_window == 0 {
            return Err(Error::Config("Cache access_time_window must be greater than 0".into()));
        }
        for category in CacheCategory::ALL {
            let fraction = self.cache.category(category).capacity_fraction;
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::Config(format!(
                    "Capacity fraction for category '{}' must be in (0, 1], got {}",
                    category, fraction
                )));
            }
        }

        // Patterns
        if !(0.0..=1.0).contains(&self.patterns.confidence_threshold) {
            return Err(Error::Config(format!(
                "Confidence threshold must be in [0, 1], got {}",
                self.patterns.confidence_threshold
            )));
        }
        if self.patterns.max_results == 0 {
            return Err(Error::Config("Pattern max_results must be greater than 0".into()));
        }
        if self.patterns.local_cache_capacity == 0 {
            return Err(Error::Config("Pattern local cache capacity must be greater than 0".into()));
        }

        // Search
        if self.search.max_results == 0 {
            return Err(Error::Config("Search max_results must be greater than 0".into()));
        }
        if !(0.0..1.0).contains(&self.search.fuzzy_threshold) {
            return Err(Error::Config(format!(
                "Fuzzy threshold must be in [0, 1), got {}",
                self.search.fuzzy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(Error::Config(format!(
                "Similarity threshold must be in [0, 1], got {}",
                self.search.similarity_threshold
            )));
        }
        if self.search.local_cache_capacity == 0 {
            return Err(Error::Config("Search local cache capacity must be greater than 0".into()));
        }

        // Logging
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(Error::Config(format!("Invalid log level: {}", self.logging.level)));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(Error::Config(format!("Invalid log format: {}", self.logging.format)));
        }

        Ok(())
    }
}

/// Load configuration for a project
pub fn load_config(project_dir: &str) -> Config {
    Config::from_project_dir(project_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.patterns.confidence_threshold, 0.7);
        assert_eq!(config.search.max_results, 100);
        assert_eq!(config.cache.category(CacheCategory::Pattern).ttl_secs, 1200);
        assert_eq!(config.cache.category(CacheCategory::Search).ttl_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_category_capacity() {
        let mut config = CacheConfig::default();
        assert_eq!(config.category_capacity(CacheCategory::Pattern), 250);
        assert_eq!(config.category_capacity(CacheCategory::Analysis), 100);

        config.max_entries = 2;
        assert_eq!(config.category_capacity(CacheCategory::Analysis), 1);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[cache]\nmax_entries = 50\ncompression_enabled = true\n").unwrap();
        writeln!(file, "[search]\nmax_results = 20").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.cache.max_entries, 50);
        assert!(config.cache.compression_enabled);
        assert_eq!(config.search.max_results, 20);
        assert_eq!(config.patterns.max_results, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_project_dir_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
        config.cache.max_entries = 10;

        config.cache.categories.search.capacity_fraction = 1.5;
        assert!(config.validate().is_err());
        config.cache.categories.search.capacity_fraction = 0.5;

        config.patterns.confidence_threshold = 1.2;
        assert!(config.validate().is_err());
        config.patterns.confidence_threshold = 0.5;

        config.search.fuzzy_threshold = 1.0;
        assert!(config.validate().is_err());
        config.search.fuzzy_threshold = 0.6;

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
        config.logging.format = "json".to_string();

        assert!(config.validate().is_ok());
    }
}
