//! Configuration Module
//!
//! Configuration loading for the streaming client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, Credentials, Environment, HttpSettings, StreamingConfig, parse_list,
};
