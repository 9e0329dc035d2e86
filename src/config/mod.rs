#[cfg(feature = "cli")]
pub mod cli;
pub mod env;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::{Cli, Command, LogFormat};
pub use toml_config::NotebookConfig;
