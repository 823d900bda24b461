//! Configuration for the macropilot engine
//!
//! Configuration is plain YAML. Two custom tags are understood while
//! loading:
//!
//! - `!include path` - Include another YAML file, relative to the including one
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use mp_config::EngineConfig;
//!
//! let config = EngineConfig::load("/etc/macropilot/engine.yaml")?;
//! println!("poll every {:?}", config.poll_interval());
//! ```

mod engine_config;
mod error;
mod loader;

pub use engine_config::{
    EngineConfig, EngineSection, LoggingConfig, MatchingConfig, PathsConfig, PlaybackConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
