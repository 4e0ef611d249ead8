//! Configuration management for Redgreen.
//!
//! Handles loading and saving configuration from TOML files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "REDGREEN_CONFIG";

/// Environment variable overriding the session state directory.
pub const STATE_DIR_ENV: &str = "REDGREEN_STATE_DIR";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Gate execution settings
    pub gate: GateConfig,

    /// Shell commands for named gate checks
    pub checks: HashMap<String, CheckConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directories searched for workflow documents
    pub workflow_dirs: Vec<String>,

    /// Where session state is kept (defaults to the user data directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// Maximum directory depth when discovering workflow documents
    pub max_depth: usize,
}

/// Gate execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Per-check timeout in seconds
    pub timeout_secs: u64,

    /// Shell used to run check commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// A named check's command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Shell command; exit code 0 passes
    pub command: String,

    /// Minimum percentage the command must print (coverage-style checks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_percent: Option<f64>,
}

impl Config {
    /// Load configuration for a project.
    ///
    /// `REDGREEN_CONFIG` wins, then `<project>/.redgreen/config.toml`, then
    /// the user config directory. Defaults apply when none exist.
    pub fn load(project: &Path) -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_file(Path::new(&path));
        }

        let project_config = project.join(".redgreen").join("config.toml");
        if project_config.exists() {
            return Self::load_from_file(&project_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    /// Save configuration to the user config directory.
    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        std::fs::create_dir_all(&config_dir)?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("redgreen"))
    }

    /// Get the data directory path.
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("redgreen"))
    }

    /// Workflow directories with `~` expanded, relative ones anchored at `project`.
    pub fn workflow_dirs(&self, project: &Path) -> Vec<PathBuf> {
        self.general.workflow_dirs.iter().map(|dir| resolve_path(dir, project)).collect()
    }

    /// Directory holding session state files.
    pub fn state_dir(&self, project: &Path) -> anyhow::Result<PathBuf> {
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.general.state_dir {
            return Ok(resolve_path(dir, project));
        }
        Self::data_dir()
            .map(|d| d.join("sessions"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            workflow_dirs: vec!["workflows".to_string(), ".redgreen/workflows".to_string()],
            state_dir: None,
            max_depth: 4,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { timeout_secs: 600, shell: None }
    }
}

fn resolve_path(raw: &str, project: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        project.join(expanded)
    }
}
