use rapidnet::{load_json, ClientConfig, ConfigError, ServerConfig};

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing_core::LevelFilter;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinLogTarget {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum LogTarget {
    File { filename: PathBuf },
    Builtin(BuiltinLogTarget),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct LogEntry {
    pub target: LogTarget,
    /// Only log events from modules with one of these prefixes. Empty means all.
    #[serde(default)]
    pub modules: Vec<String>,
    pub level: Option<LogLevel>,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    /// Directory in which file targets are created
    pub dir: PathBuf,
    pub default_level: Option<LogLevel>,
    pub module_levels: HashMap<String, LogLevel>,
    /// With no targets, each binary logs its own and the engine's events to stderr
    pub targets: Vec<LogEntry>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("log"),
            default_level: Some(LogLevel::Info),
            module_levels: HashMap::new(),
            targets: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn has_file_targets(&self) -> bool {
        self.targets
            .iter()
            .any(|entry| matches!(entry.target, LogTarget::File { .. }))
    }

    /// The configured targets, or the default stderr target for `binary`.
    pub fn targets_for(&self, binary: &str) -> Vec<LogEntry> {
        if !self.targets.is_empty() {
            return self.targets.clone();
        }

        vec![LogEntry {
            target: LogTarget::Builtin(BuiltinLogTarget::Stderr),
            modules: vec![binary.to_string(), "rapidnet".to_string()],
            level: None,
        }]
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(arg: LogLevel) -> LevelFilter {
        match arg {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

/// Configuration file for the echo server binary.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct EchoServerConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LoggingConfig,
}

impl EchoServerConfig {
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(filename)
    }
}

/// Configuration file for the echo client binary.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct EchoClientConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub log: LoggingConfig,
}

impl EchoClientConfig {
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(filename)
    }
}
