//! Configuration management

use clap::Parser;
use config::{
    builder::DefaultState, Config as ConfigBuilder, ConfigBuilder as Builder,
    ConfigError as BuilderError, Environment, File,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid http configuration: {0}")]
    InvalidHttp(String),

    #[error("Invalid sources configuration: {0}")]
    InvalidSources(String),

    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugin(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; Mobile) AppleWebKit/537.36";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    pub sources: SourcesConfig,
    pub plugins: PluginConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // VODBOX_ prefix with __ for nesting, e.g. VODBOX_HTTP__REQUEST_TIMEOUT=20
        builder = builder.add_source(
            Environment::with_prefix("VODBOX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(cache_dir) = &cli_args.cache_dir {
            builder = builder.set_override("plugins.cache_dir", cache_dir.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.validate()?;
        self.sources.validate()?;
        self.plugins.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                user_agent: DEFAULT_USER_AGENT.to_string(),
                accept_language: "zh-CN,zh;q=0.9".to_string(),
                request_timeout: 30,
                connect_timeout: 10,
            },
            sources: SourcesConfig {
                default_timeout: 30,
                live_type_synonyms: vec!["live".to_string(), "直播".to_string()],
                live_keywords: vec!["live".to_string(), "直播".to_string()],
                max_concurrent_sources: 8,
            },
            plugins: PluginConfig {
                cache_dir: default_cache_dir(),
                entry_prefix: "csp_".to_string(),
                vip_flags: Vec::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                output: "stderr".to_string(),
                log_file: None,
            },
        }
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("http.user_agent", DEFAULT_USER_AGENT)?
        .set_default("http.accept_language", "zh-CN,zh;q=0.9")?
        .set_default("http.request_timeout", 30)?
        .set_default("http.connect_timeout", 10)?
        .set_default("sources.default_timeout", 30)?
        .set_default("sources.live_type_synonyms", vec!["live", "直播"])?
        .set_default("sources.live_keywords", vec!["live", "直播"])?
        .set_default("sources.max_concurrent_sources", 8)?
        .set_default("plugins.cache_dir", default_cache_dir().display().to_string())?
        .set_default("plugins.entry_prefix", "csp_")?
        .set_default("plugins.vip_flags", Vec::<String>::new())?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")?)
}

/// Platform cache directory for downloaded spiders, falling back to the temp dir
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vodbox")
        .join("spiders")
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Parser)]
#[command(name = "vodbox")]
#[command(about = "Decode a video source and query its spider", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory used to cache downloaded spider modules
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Source URL to decode (config, catalog or image-wrapped payload)
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// Search every searchable source for a keyword
    #[arg(short, long, value_name = "KEYWORD")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout: u64, // seconds
    pub connect_timeout: u64, // seconds
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidHttp("user_agent cannot be empty".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidHttp("request_timeout must be greater than 0".to_string()));
        }

        if self.connect_timeout == 0 {
            return Err(ConfigError::InvalidHttp("connect_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub default_timeout: u64, // seconds
    pub live_type_synonyms: Vec<String>,
    pub live_keywords: Vec<String>,
    pub max_concurrent_sources: usize,
}

impl SourcesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout == 0 {
            return Err(ConfigError::InvalidSources("default_timeout must be greater than 0".to_string()));
        }

        if self.max_concurrent_sources == 0 {
            return Err(ConfigError::InvalidSources(
                "max_concurrent_sources must be greater than 0".to_string(),
            ));
        }

        if self.live_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidSources("live_keywords cannot contain blank entries".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub cache_dir: PathBuf,
    pub entry_prefix: String,
    pub vip_flags: Vec<String>,
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPlugin("cache_dir cannot be empty".to_string()));
        }

        if self.entry_prefix.is_empty() {
            return Err(ConfigError::InvalidPlugin("entry_prefix cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
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
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.plugins.entry_prefix, "csp_");
        assert_eq!(config.sources.default_timeout, 30);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load(&CliArgs::default()).unwrap();
        assert_eq!(config.http.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.sources.live_type_synonyms, vec!["live", "直播"]);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"\n\n[plugins]\nentry_prefix = \"spd_\"").unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            log_level: Some("debug".to_string()),
            cache_dir: Some(PathBuf::from("/tmp/vodbox-test-cache")),
            ..Default::default()
        };

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.plugins.entry_prefix, "spd_");
        assert_eq!(config.plugins.cache_dir, PathBuf::from("/tmp/vodbox-test-cache"));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        assert!(matches!(Config::load(&cli), Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_logging_validation() {
        let mut logging = Config::default().logging;
        logging.output = "file".to_string();
        assert!(logging.validate().is_err());

        logging.log_file = Some(PathBuf::from("./logs/vodbox.log"));
        assert!(logging.validate().is_ok());

        logging.format = "yaml".to_string();
        assert!(logging.validate().is_err());
    }

    #[test]
    fn test_sources_validation() {
        let mut sources = Config::default().sources;
        sources.max_concurrent_sources = 0;
        assert!(sources.validate().is_err());
    }
}
