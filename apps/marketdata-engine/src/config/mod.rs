//! Configuration
//!
//! Environment-driven settings for the engine and its upstream endpoints.

mod settings;

pub use settings::{
    CacheSettings, ConfigError, Credentials, EngineConfig, FetchSettings, StreamSettings,
};
