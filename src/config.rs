//! Configuration for the task tree
//!
//! Every bound the tree enforces lives here and is threaded explicitly through
//! [`TaskTree`](crate::tree::TaskTree) construction. Values are loaded through
//! figment with the usual precedence:
//!
//! 1. Programmatic defaults
//! 2. `burrow.yaml`
//! 3. `burrow.local.yaml`
//! 4. `BURROW_*` environment variables (`__` separates nested keys)

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling on configurable recursion depth
pub const MAX_RECURSION_DEPTH: u32 = 10;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid min_timeout_secs: {0}. Must be positive")]
    InvalidMinTimeout(u64),

    #[error("Invalid timeout bounds: min_timeout_secs ({0}) exceeds max_timeout_secs ({1})")]
    InvalidTimeoutBounds(u64, u64),

    #[error("Invalid default_timeout_secs: {0}. Must be within [{1}, {2}]")]
    InvalidDefaultTimeout(u64, u64, u64),

    #[error("Invalid test_timeout_secs: {0}. Must be positive")]
    InvalidTestTimeout(u64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Invalid max_depth: {0}. Must be at most {MAX_RECURSION_DEPTH}")]
    InvalidMaxDepth(u32),

    #[error("Invalid child_prefix: {0:?}. Must be non-empty and use only [a-z0-9_]")]
    InvalidChildPrefix(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Validation program cannot be empty")]
    EmptyValidationProgram,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurrowConfig {
    /// Lower bound for any node timeout
    pub min_timeout_secs: u64,
    /// Upper bound for any node timeout
    pub max_timeout_secs: u64,
    /// Root node timeout
    pub default_timeout_secs: u64,
    /// Upper bound for a single validation run, regardless of node budget
    pub test_timeout_secs: u64,
    /// Retry iterations per session, inherited by children
    pub max_retries: u32,
    /// Deepest allowed node depth (root is 0)
    pub max_depth: u32,
    /// Step budget handed to the worker per attempt
    pub step_budget: u32,
    /// Attempts included in a diagnostics bundle
    pub history_window: usize,
    /// Attempts retained per node before the oldest are evicted
    pub history_capacity: usize,
    /// Prefix for child node ids and directories
    pub child_prefix: String,
    pub layout: WorkspaceLayout,
    pub validation: ValidationConfig,
    pub logging: LogConfig,
}

impl Default for BurrowConfig {
    fn default() -> Self {
        Self {
            min_timeout_secs: 30,
            max_timeout_secs: 3600,
            default_timeout_secs: 300,
            test_timeout_secs: 60,
            max_retries: 3,
            max_depth: 5,
            step_budget: 10,
            history_window: 5,
            history_capacity: 50,
            child_prefix: "task_".to_string(),
            layout: WorkspaceLayout::default(),
            validation: ValidationConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl BurrowConfig {
    /// Clamp a timeout into the configured bounds
    pub fn clamp_timeout(&self, secs: u64) -> u64 {
        secs.max(self.min_timeout_secs).min(self.max_timeout_secs)
    }

    /// Timeout for a child of a node with `parent_secs`
    ///
    /// Without an override a child gets half its parent's budget.
    pub fn child_timeout(&self, parent_secs: u64, override_secs: Option<u64>) -> u64 {
        self.clamp_timeout(override_secs.unwrap_or(parent_secs / 2))
    }

    /// Timeout applied to a validation run for a node with `node_secs`
    pub fn validation_timeout(&self, node_secs: u64) -> u64 {
        node_secs.min(self.test_timeout_secs).max(1)
    }
}

/// File names used inside every node workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceLayout {
    pub task: String,
    pub artifact: String,
    pub test: String,
    pub dependencies: String,
    pub log: String,
    pub errors: String,
    pub test_result: String,
    pub meta: String,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self {
            task: "prompt.txt".to_string(),
            artifact: "solution.py".to_string(),
            test: "test_solution.py".to_string(),
            dependencies: "requirements.txt".to_string(),
            log: "log.txt".to_string(),
            errors: "error.txt".to_string(),
            test_result: "test_results.json".to_string(),
            meta: "node.json".to_string(),
        }
    }
}

/// How artifacts are executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Command running a node's test file
    pub command: ValidationCommand,
    /// Interpreter used for ad-hoc snippets
    pub interpreter: String,
    /// Extension of the temporary snippet file
    pub snippet_extension: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            command: ValidationCommand::default(),
            interpreter: "python".to_string(),
            snippet_extension: "py".to_string(),
        }
    }
}

/// Program plus argument template
///
/// Arguments may contain `{test}`, `{artifact}` and `{dir}`, replaced with the
/// node's test file, artifact file and workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ValidationCommand {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with placeholders substituted
    pub fn render_args(&self, test: &Path, artifact: &Path, dir: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{test}", &test.to_string_lossy())
                    .replace("{artifact}", &artifact.to_string_lossy())
                    .replace("{dir}", &dir.to_string_lossy())
            })
            .collect()
    }
}

impl Default for ValidationCommand {
    fn default() -> Self {
        Self::new("python", ["-m", "pytest", "{test}", "-v", "--tb=short"])
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the working directory and environment
    pub fn load() -> Result<BurrowConfig> {
        let config: BurrowConfig = Figment::new()
            .merge(Serialized::defaults(BurrowConfig::default()))
            .merge(Yaml::file("burrow.yaml"))
            .merge(Yaml::file("burrow.local.yaml"))
            .merge(Env::prefixed("BURROW_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<BurrowConfig> {
        let config: BurrowConfig = Figment::new()
            .merge(Serialized::defaults(BurrowConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from an inline YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<BurrowConfig> {
        let config: BurrowConfig = Figment::new()
            .merge(Serialized::defaults(BurrowConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .context("Failed to parse inline configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &BurrowConfig) -> Result<(), ConfigError> {
        if config.min_timeout_secs == 0 {
            return Err(ConfigError::InvalidMinTimeout(config.min_timeout_secs));
        }
        if config.min_timeout_secs > config.max_timeout_secs {
            return Err(ConfigError::InvalidTimeoutBounds(
                config.min_timeout_secs,
                config.max_timeout_secs,
            ));
        }
        if !(config.min_timeout_secs..=config.max_timeout_secs)
            .contains(&config.default_timeout_secs)
        {
            return Err(ConfigError::InvalidDefaultTimeout(
                config.default_timeout_secs,
                config.min_timeout_secs,
                config.max_timeout_secs,
            ));
        }
        if config.test_timeout_secs == 0 {
            return Err(ConfigError::InvalidTestTimeout(config.test_timeout_secs));
        }
        if config.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.max_retries));
        }
        if config.max_depth > MAX_RECURSION_DEPTH {
            return Err(ConfigError::InvalidMaxDepth(config.max_depth));
        }

        let prefix_ok = !config.child_prefix.is_empty()
            && config
                .child_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !prefix_ok {
            return Err(ConfigError::InvalidChildPrefix(config.child_prefix.clone()));
        }

        if config.validation.command.program.trim().is_empty() {
            return Err(ConfigError::EmptyValidationProgram);
        }
        if config.history_window == 0 || config.history_capacity < config.history_window {
            return Err(ConfigError::ValidationFailed(format!(
                "history_capacity ({}) must be at least history_window ({}), \
                 and the window must be non-zero",
                config.history_capacity, config.history_window
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}
