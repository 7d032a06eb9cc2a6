//! Configuration system for the Vale server.
//!
//! Provides runtime-configurable settings that persist to disk as RON files.
//! Supports hot-reload detection and forward/backward compatible
//! serialization.

mod config;
mod error;

pub use config::{DebugConfig, GameplayConfig, SaveConfig, ServerConfig, TickConfig};
pub use error::ConfigError;
