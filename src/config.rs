//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (FUSEDB_* prefix, `__` section separator)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [toolchain]
//! compiler = "clang++"
//! standard = "c++17"
//! runtime_dir = "runtime"
//!
//! [engine]
//! backend = "source"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FUSEDB_TOOLCHAIN__COMPILER=g++
//! FUSEDB_ENGINE__BACKEND=bitcode
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External toolchain configuration for the ahead-of-time path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// External compiler binary
    #[serde(default = "default_compiler")]
    pub compiler: String,

    /// Language standard passed as -std=
    #[serde(default = "default_standard")]
    pub standard: String,

    /// Directory holding the runtime header and translation unit
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Directory for generated sources, libraries, and bitcode
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

/// Which program-builder backend compiles queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Emit C++ source and compile with the external toolchain
    #[default]
    Source,
    /// Build the in-memory IR module and serialize bitcode
    Bitcode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: Backend,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_compiler() -> String {
    "clang++".to_string()
}
fn default_standard() -> String {
    "c++17".to_string()
}
fn default_runtime_dir() -> PathBuf {
    PathBuf::from("runtime")
}
fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("fusedb")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            compiler: default_compiler(),
            standard: default_standard(),
            runtime_dir: default_runtime_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (FUSEDB_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("FUSEDB_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FUSEDB_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.toolchain.compiler, "clang++");
        assert_eq!(config.toolchain.standard, "c++17");
        assert_eq!(config.engine.backend, Backend::Source);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[toolchain]"));
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("backend = \"source\""));
    }

    #[test]
    fn test_backend_roundtrip() {
        let parsed: EngineConfig = toml::from_str("backend = \"bitcode\"").unwrap();
        assert_eq!(parsed.backend, Backend::Bitcode);
    }
}
