//! docs-cli library: the on-disk store and configuration behind the `docs`
//! binary, exposed for integration tests.

pub mod config;
pub mod json_store;

pub use config::{Config, ConfigError};
pub use json_store::JsonFileStore;
