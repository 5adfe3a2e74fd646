use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// The lowercase name used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where the debug server listens for client connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port the TCP listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    41912
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Debugger-side conventions and initial runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Whether the interpreter numbers lines from 1.
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    /// Whether the interpreter reports source paths as URIs.
    #[serde(default)]
    pub paths_are_uri: bool,
    /// Initial pattern deciding which runtime errors pause execution.
    #[serde(default = "default_error_filter")]
    pub error_filter: String,
    /// Whether "Execution ended." is printed when a script finishes.
    #[serde(default)]
    pub notify_execution_end: bool,
    /// Directory for materialized in-memory sources (system temp dir when unset).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// File extension given to materialized sources.
    #[serde(default = "default_temp_extension")]
    pub temp_extension: String,
}

fn default_true() -> bool {
    true
}

fn default_error_filter() -> String {
    "(?s).*".to_string()
}

fn default_temp_extension() -> String {
    "lua".to_string()
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            lines_start_at1: true,
            paths_are_uri: false,
            error_filter: default_error_filter(),
            notify_execution_end: false,
            temp_dir: None,
            temp_extension: default_temp_extension(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Optional path to a log file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// Top-level moonlit configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Debugger conventions.
    #[serde(default)]
    pub debugger: DebuggerConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}
