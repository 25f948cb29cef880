//! Configuration management for the OPDS reader.
//!
//! Configuration is read from `~/.config/opds-reader/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::{PageMode, ScaleMode};

/// Memory use fraction above which non-essential pages are evicted.
pub const DEFAULT_MEMORY_THRESHOLD: f32 = 0.8;

/// Pages preloaded on each side of the current page.
pub const DEFAULT_PRELOAD_RADIUS: u32 = 3;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub reader: ReaderSettings,
}

/// Catalog server and HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Catalog root opened when no URL is given.
    pub url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Accept self-signed certificates (home servers often use them).
    pub accept_invalid_certs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 30,
            user_agent: concat!("opds-reader/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_invalid_certs: false,
        }
    }
}

/// Reader preferences.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub page_mode: PageMode,
    pub scale_mode: ScaleMode,
    pub show_page_number: bool,
    /// Open the adjacent entry when paging past either end of a volume.
    pub auto_open_next_book: bool,
    pub enable_preloading: bool,
    pub preload_radius: u32,
    pub memory_threshold: f32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            page_mode: PageMode::Single,
            scale_mode: ScaleMode::FitScreen,
            show_page_number: true,
            auto_open_next_book: true,
            enable_preloading: true,
            preload_radius: DEFAULT_PRELOAD_RADIUS,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
        }
    }
}

impl ReaderSettings {
    /// Radius is never below one page.
    pub fn with_preload_radius(self, radius: u32) -> Self {
        Self {
            preload_radius: radius.max(1),
            ..self
        }
    }

    pub fn effective_preload_radius(&self) -> u32 {
        self.preload_radius.max(1)
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

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/opds-reader/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("opds-reader").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# OPDS Reader Configuration

[server]
# Catalog root opened by `opds-reader browse` when no URL is given,
# e.g. "https://komga.local/opds/v1.2/catalog"
url = ""

# Request timeout in seconds
timeout_secs = 30

user_agent = "opds-reader/0.1.0"

# Accept self-signed or otherwise invalid TLS certificates
accept_invalid_certs = false

[reader]
# "single" or "double"
page_mode = "single"

# "fit_width", "fit_height" or "fit_screen"
scale_mode = "fit_screen"

show_page_number = true

# Open the next/previous entry when paging past either end of a volume
auto_open_next_book = true

# Fetch pages around the current one in the background
enable_preloading = true

# Pages preloaded on each side of the current page (minimum 1)
preload_radius = 3

# Fraction of system memory in use above which preloaded pages are dropped
memory_threshold = 0.8
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
