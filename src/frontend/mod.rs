//! Frontend components
//!
//! The CLI and the `jsbridge.toml` configuration that drive a generation
//! session.

pub mod cli;
pub mod config;

pub use cli::main as cli_main;
pub use config::{ConfigError, GeneratorConfig};
