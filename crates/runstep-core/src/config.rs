//! Engine configuration.
//!
//! Uses a `key=value` file format. Precedence: CLI flags > config file >
//! defaults.

use crate::version::{Distribution, ToolVersion};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
}

/// Process-wide defaults for run steps.
///
/// Passed explicitly to the runner so independent engines never share state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Distribution used when a project does not choose one.
    pub default_distribution: Distribution,
    /// Version used when a project does not choose one.
    pub default_version: ToolVersion,
    /// Directory holding the installed tool binaries; prepended to `PATH`.
    pub bin_dir: PathBuf,
    /// Shell interpreter for run-step commands.
    pub shell: String,
    /// Arguments placed before the command text.
    pub shell_args: Vec<String>,
    /// Forward output lines to the output subscriber.
    pub stream_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_distribution: Distribution::Terraform,
            default_version: ToolVersion::new(1, 5, 7),
            bin_dir: default_bin_dir(),
            shell: "sh".to_string(),
            shell_args: vec!["-c".to_string()],
            stream_output: true,
        }
    }
}

/// `{data_local_dir}/runstep/bin`, or a relative `runstep/bin` that
/// [`EngineConfig::resolve_paths`] anchors when no data dir is known.
fn default_bin_dir() -> PathBuf {
    let relative = PathBuf::from("runstep").join("bin");
    match dirs::data_local_dir() {
        Some(dir) => dir.join(relative),
        None => relative,
    }
}

impl EngineConfig {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "default_distribution" => {
                self.default_distribution = value.parse().map_err(|_| invalid())?;
            }
            "default_version" => {
                self.default_version = value.parse().map_err(|_| invalid())?;
            }
            "bin_dir" => self.bin_dir = PathBuf::from(value),
            "shell" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                self.shell = value.to_string();
            }
            "shell_args" => {
                let args: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if args.is_empty() {
                    return Err(invalid());
                }
                self.shell_args = args;
            }
            "stream_output" => self.stream_output = Self::parse_bool(key, value)?,
            _ => {
                tracing::warn!(key, "unknown config key");
            }
        }
        Ok(())
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve a relative bin dir against a base directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.bin_dir.is_relative() {
            self.bin_dir = base.join(&self.bin_dir);
        }
    }
}
