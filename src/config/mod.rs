//! Configuration for a kingsrss run.
//!
//! Configuration is read from `srcconf.yml` in the working directory unless
//! the `KINGSRSS_CONFIG` environment variable names another file. YAML is the
//! native format (JSON documents are accepted as YAML); a `.toml` extension
//! switches to TOML.

mod email;

pub use email::EmailConfig;

use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file used when `KINGSRSS_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "srcconf.yml";

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "KINGSRSS_CONFIG";

/// Image size budget: 0.5 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 512 * 1024;

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Feeds to collect, processed in order.
    pub urls: Vec<FeedSource>,

    /// HTML placed in an introduction chapter when a new book is created.
    #[serde(default)]
    pub prefix_html: Option<String>,

    #[serde(default)]
    pub email: EmailConfig,

    /// SQLite file holding the processed-article ledger.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Directory a random cover image is picked from for new books.
    #[serde(default = "default_cover_dir")]
    pub cover_dir: PathBuf,

    /// Directory the daily book is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name prefix of the daily book.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Byte budget for each embedded image.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// One configured feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    pub url: String,
    pub name: String,
    /// Table-of-contents section; falls back to `name`.
    #[serde(default)]
    pub section: Option<String>,
    /// Accepted for compatibility. The introduction chapter is added once,
    /// when the book is created, regardless of this flag.
    #[serde(default = "default_true")]
    pub add_prefix: bool,
}

impl FeedSource {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            section: None,
            add_prefix: true,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Section title this feed's chapters are filed under.
    pub fn section_title(&self) -> &str {
        self.section.as_deref().unwrap_or(&self.name)
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("records.db")
}

fn default_cover_dir() -> PathBuf {
    PathBuf::from("cover")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_prefix() -> String {
    "kingsrss".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Path of the config file to read, honouring `KINGSRSS_CONFIG`.
    pub fn default_config_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate configuration from `path`.
    ///
    /// The format is picked from the extension: `.toml` is TOML, anything
    /// else is YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Toml {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Yaml {
                path: path.to_path_buf(),
                source: e,
            })?
        };

        Self::validated(config)
    }

    /// Parse a YAML (or JSON) document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str(content).map_err(|e| ConfigError::Yaml {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        Self::validated(config)
    }

    fn validated(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that parse but cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, feed) in self.urls.iter().enumerate() {
            if feed.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("urls[{index}]: url is empty")));
            }
            if feed.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("urls[{index}]: name is empty")));
            }
        }

        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid("max_image_bytes must be positive".into()));
        }

        self.email.validate()
    }

    /// Location of the book for `date`: `<output_dir>/<prefix>_<YYYYMMDD>.epub`.
    pub fn book_path(&self, date: NaiveDate) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}.epub",
            self.output_prefix,
            date.format("%Y%m%d")
        ))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
