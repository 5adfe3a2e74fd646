//! moonlit-config: TOML configuration for the moonlit debug server.

pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

pub use config::{Config, DebuggerConfig, LogConfig, LogLevel, ServerConfig};
pub use error::ConfigError;
pub use load::{default_config_dir, load_config, load_from_str};
pub use merge::merge_configs;
pub use validate::validate;
