//! Configuration management for the module host
//!
//! Handles loading `host.toml`, environment overrides and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::module::traits::ModuleError;
use crate::utils::{env_bool, env_list, env_opt};

/// Overrides `[packages] packages_dir`
pub const ENV_PACKAGES_DIR: &str = "MODULE_HOST_PACKAGES_DIR";
/// Overrides `[logging] filter`
pub const ENV_LOG: &str = "MODULE_HOST_LOG";
/// Overrides `[logging] json_format`
pub const ENV_LOG_JSON: &str = "MODULE_HOST_LOG_JSON";
/// Overrides `[packages] enabled_packages` (comma separated)
pub const ENV_ENABLED_PACKAGES: &str = "MODULE_HOST_ENABLED_PACKAGES";

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive such as "info" or "module_host::module=debug".
    /// RUST_LOG takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (needs the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Package discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Directory holding one sub-directory per package
    #[serde(default = "default_packages_dir")]
    pub packages_dir: PathBuf,

    /// Packages to install (empty = every discovered package)
    #[serde(default)]
    pub enabled_packages: Vec<String>,

    /// Scan `packages_dir` at startup
    #[serde(default = "default_true")]
    pub auto_discover: bool,
}

/// Screen manager limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreensConfig {
    /// Popups one component may have open at once
    #[serde(default = "default_max_popups")]
    pub max_popups_per_component: usize,
}

fn default_true() -> bool {
    true
}

fn default_packages_dir() -> PathBuf {
    PathBuf::from("packages")
}

fn default_max_popups() -> usize {
    4
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            packages_dir: default_packages_dir(),
            enabled_packages: Vec::new(),
            auto_discover: true,
        }
    }
}

impl Default for ScreensConfig {
    fn default() -> Self {
        Self {
            max_popups_per_component: default_max_popups(),
        }
    }
}

/// Host configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub packages: PackagesConfig,

    #[serde(default)]
    pub screens: ScreensConfig,
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ModuleError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModuleError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| ModuleError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ModuleError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ModuleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` if given, else defaults, then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ModuleError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MODULE_HOST_*` environment variables over file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_opt(ENV_PACKAGES_DIR) {
            self.packages.packages_dir = PathBuf::from(dir);
        }
        if let Some(filter) = env_opt(ENV_LOG) {
            self.logging.filter = Some(filter);
        }
        if env_bool(ENV_LOG_JSON) {
            self.logging.json_format = true;
        }
        if let Some(enabled) = env_list(ENV_ENABLED_PACKAGES) {
            self.packages.enabled_packages = enabled;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.screens.max_popups_per_component == 0 {
            return Err(ModuleError::Config(
                "screens.max_popups_per_component must be at least 1".to_string(),
            ));
        }
        if self.packages.packages_dir.as_os_str().is_empty() {
            return Err(ModuleError::Config(
                "packages.packages_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
