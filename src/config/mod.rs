// Configuration management module
// TOML settings, environment overrides and the interactive setup

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, EmbeddingProviderKind, OllamaConfig, StoreConfig,
};
