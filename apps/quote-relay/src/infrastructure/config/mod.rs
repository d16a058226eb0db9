//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    BufferSettings, ConfigError, Credentials, RelayConfig, ServerSettings, UpstreamSettings,
    append_query,
};
