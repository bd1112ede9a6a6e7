//! Configuration management for taskrun.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values
//!
//! Individual runs can still override any `run` value through
//! [`RunOptions`](crate::execution::RunOptions).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::error::TaskrunError;
use crate::execution::HideSet;
use crate::pty::default_shell;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for every run.
    pub run: RunSection,
    /// Timeouts.
    pub timeouts: TimeoutsSection,
    /// Privilege escalation settings.
    pub sudo: SudoSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Run defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Shell used to interpret commands.
    pub shell: String,
    /// Allocate a pseudo-terminal.
    pub pty: bool,
    /// Fall back to pipes when a pty cannot be used.
    pub fallback: bool,
    /// Streams kept off the local terminal.
    pub hide: HideSet,
    /// Print each command before running it.
    pub echo: bool,
    /// Mirror forwarded stdin locally; `null` decides per run.
    pub echo_stdin: Option<bool>,
    /// Template for echoed commands; `{command}` is substituted.
    pub echo_format: String,
    /// Print commands instead of running them.
    pub dry: bool,
    /// Do not fail on nonzero exit codes.
    pub warn: bool,
    /// Run in the background by default.
    pub asynchronous: bool,
    /// Start and forget by default.
    pub disown: bool,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Use `env` as the complete environment.
    pub replace_env: bool,
    /// Text encoding label; `null` follows the locale.
    pub encoding: Option<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            pty: false,
            fallback: true,
            hide: HideSet::NONE,
            echo: false,
            echo_stdin: None,
            echo_format: "\x1b[1;37m{command}\x1b[0m".to_string(),
            dry: false,
            warn: false,
            asynchronous: false,
            disown: false,
            env: HashMap::new(),
            replace_env: false,
            encoding: None,
        }
    }
}

/// Timeout configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    /// Default command timeout in seconds.
    pub command: Option<f64>,
}

/// Sudo configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SudoSection {
    /// Prompt sudo is told to print (and that gets answered).
    pub prompt: String,
    /// Password to answer the prompt with.
    pub password: Option<String>,
    /// User to run as; `null` means root.
    pub user: Option<String>,
}

impl Default for SudoSection {
    fn default() -> Self {
        Self {
            prompt: "[sudo] password: ".to_string(),
            password: None,
            user: None,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any `TASKRUN_*` lookup.
    pub fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(shell) = var("TASKRUN_SHELL").filter(|s| !s.is_empty()) {
            self.run.shell = shell;
        }

        if let Some(pty) = var("TASKRUN_PTY").as_deref().and_then(parse_flag) {
            self.run.pty = pty;
        }

        if let Some(echo) = var("TASKRUN_ECHO").as_deref().and_then(parse_flag) {
            self.run.echo = echo;
        }

        if let Some(warn) = var("TASKRUN_WARN").as_deref().and_then(parse_flag) {
            self.run.warn = warn;
        }

        if let Some(hide) = var("TASKRUN_HIDE") {
            if let Ok(hide) = hide.parse() {
                self.run.hide = hide;
            }
        }

        if let Some(timeout) = var("TASKRUN_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<f64>() {
                self.timeouts.command = (secs > 0.0).then_some(secs);
            }
        }

        if let Some(password) = var("TASKRUN_SUDO_PASSWORD") {
            self.sudo.password = Some(password);
        }

        if let Some(level) = var("TASKRUN_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref shell) = args.shell {
            self.run.shell = shell.clone();
        }

        if args.pty {
            self.run.pty = true;
        }

        if args.no_fallback {
            self.run.fallback = false;
        }

        if let Some(hide) = args.hide {
            self.run.hide = hide;
        }

        if args.echo {
            self.run.echo = true;
        }

        if args.warn {
            self.run.warn = true;
        }

        if args.dry {
            self.run.dry = true;
        }

        if args.disown {
            self.run.disown = true;
        }

        if let Some(timeout) = args.timeout {
            self.timeouts.command = Some(timeout);
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Config::default();

        // Load from config file if specified
        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        // Apply environment variable overrides
        config.apply_env();

        // Apply CLI argument overrides (highest priority)
        config.apply_args(args);

        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("run.shell must not be empty".into()));
        }
        if let Some(timeout) = self.timeouts.command {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.command must be a positive number of seconds, got {timeout}"
                )));
            }
        }
        if self.run.asynchronous && self.run.disown {
            return Err(ConfigError::Invalid(
                "run.asynchronous and run.disown cannot both be set".into(),
            ));
        }
        Ok(())
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A value that cannot be used.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for TaskrunError {
    fn from(err: ConfigError) -> Self {
        TaskrunError::Config(err.to_string())
    }
}
