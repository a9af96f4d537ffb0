use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Presentation preferences loaded from TOML. Service settings come from
/// the environment, not from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Print tool calls and a summary of their results
    #[serde(default = "default_true")]
    pub show_tool_results: bool,

    /// Print every agent state transition
    #[serde(default)]
    pub show_state_changes: bool,

    /// Model override (takes precedence over AGENT_MODEL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            show_tool_results: true,
            show_state_changes: false,
            model: None,
        }
    }
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/talkdata/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("talkdata");
        Ok(config_dir)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Returns default config if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            let config = Self::default();
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let toml_str = toml::to_string_pretty(&config)
                .context("failed to serialize default config")?;
            std::fs::write(&config_path, toml_str).ok();
            Ok(config)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Priority: cli_override > config file > environment default.
    pub fn resolve_model(&self, cli_override: Option<&str>, env_default: &str) -> String {
        cli_override
            .map(String::from)
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| env_default.to_string())
    }
}
