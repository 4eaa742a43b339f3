//! Configuration for postflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FIRECRAWL_API_KEY, GEMINI_API_KEY,
//!    POSTFLOW_PROMPTS_DIR, POSTFLOW_JOURNAL)
//! 2. Config file (.postflow/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .postflow/config.yaml
//! - Relative paths in the config file resolve against the project root
//!   (the directory containing .postflow/)
//!
//! The resolved [`Config`] is built once at startup and passed to whatever
//! needs it; there is no global instance.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::BusSettings;

pub const ENV_FIRECRAWL_KEY: &str = "FIRECRAWL_API_KEY";
pub const ENV_GEMINI_KEY: &str = "GEMINI_API_KEY";
pub const ENV_PROMPTS_DIR: &str = "POSTFLOW_PROMPTS_DIR";
pub const ENV_JOURNAL: &str = "POSTFLOW_JOURNAL";

/// Fatal startup-time configuration problems
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing credential for {service} (set {env_var})")]
    MissingCredential {
        service: &'static str,
        env_var: &'static str,
    },

    #[error("missing prompt template '{platform}' (expected {path:?})")]
    MissingTemplate { platform: String, path: PathBuf },
}

/// Firecrawl settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_scraper_url")]
    pub base_url: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_scraper_timeout")]
    pub timeout_seconds: u64,
}

fn default_scraper_url() -> String {
    "https://api.firecrawl.dev".to_string()
}
fn default_scraper_timeout() -> u64 {
    60
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_scraper_url(),
            api_key: None,
            timeout_seconds: default_scraper_timeout(),
        }
    }
}

/// Gemini settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_url")]
    pub base_url: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_generator_timeout")]
    pub timeout_seconds: u64,
}

fn default_generator_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_generator_timeout() -> u64 {
    120
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_generator_url(),
            api_key: None,
            model: default_model(),
            timeout_seconds: default_generator_timeout(),
        }
    }
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    pub prompts_dir: Option<String>,
    #[serde(default)]
    pub bus: BusSettings,
}

/// Resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub scraper: ScraperConfig,
    pub generator: GeneratorConfig,
    /// Directory holding `<platform>-prompt.txt` templates
    pub prompts_dir: PathBuf,
    pub bus: BusSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_parts(ConfigFile::default(), Path::new("."), None)
    }
}

impl Config {
    /// Discover the config file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load a specific config file (no environment overrides)
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = load_config_file(path)?;

        // Project root is the parent of .postflow/
        let base_dir = path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        Ok(Self::from_parts(file, base_dir, Some(path.to_path_buf())))
    }

    fn from_parts(file: ConfigFile, base_dir: &Path, config_file: Option<PathBuf>) -> Self {
        let prompts_dir = file
            .prompts_dir
            .as_deref()
            .map(|p| resolve_path(base_dir, p))
            .unwrap_or_else(|| base_dir.join("prompts"));

        let mut bus = file.bus;
        bus.journal_path = bus
            .journal_path
            .map(|p| resolve_path(base_dir, &p.to_string_lossy()));

        Self {
            scraper: file.scraper,
            generator: file.generator,
            prompts_dir,
            bus,
            config_file,
        }
    }

    /// Overlay environment values; `lookup` is `std::env::var` outside tests
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_FIRECRAWL_KEY) {
            self.scraper.api_key = Some(key);
        }
        if let Some(key) = non_empty(ENV_GEMINI_KEY) {
            self.generator.api_key = Some(key);
        }
        if let Some(dir) = non_empty(ENV_PROMPTS_DIR) {
            self.prompts_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty(ENV_JOURNAL) {
            self.bus.journal_path = Some(PathBuf::from(path));
        }
    }

    /// Fail unless both collaborators have credentials
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.scraper.api_key.is_none() {
            return Err(ConfigError::MissingCredential {
                service: "Firecrawl",
                env_var: ENV_FIRECRAWL_KEY,
            });
        }
        if self.generator.api_key.is_none() {
            return Err(ConfigError::MissingCredential {
                service: "Gemini",
                env_var: ENV_GEMINI_KEY,
            });
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".postflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
