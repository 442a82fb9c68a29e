
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingConfig, EmbeddingProviderKind, OllamaConfig, StoreConfig};
use crate::database::StoreBackend;
use crate::database::postgres::url::normalize_database_url;
use crate::embeddings::OllamaProvider;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 Docuchat Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Document Store").bold().yellow());
    eprintln!("Choose where chunks and their embeddings are persisted.");
    eprintln!();
    configure_store(&mut config.store)?;

    eprintln!();
    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Configure the service that turns chunk text into vectors.");
    eprintln!();
    configure_embedding(&mut config.embedding)?;

    if config.embedding.provider == EmbeddingProviderKind::Ollama {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_ollama_connection(&config.embedding) {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before ingesting.");
        }
    } else if config.embedding.resolved_openai_api_key().is_none() {
        eprintln!();
        eprintln!(
            "{}",
            style("⚠ OPENAI_API_KEY is not set; ingestion and search will fail until it is.")
                .yellow()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Store Settings:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    match config.store.backend {
        StoreBackend::Sqlite => {
            eprintln!("  Path: {}", style(config.sqlite_path().display()).cyan());
        }
        StoreBackend::LanceDb => {
            eprintln!("  Path: {}", style(config.lancedb_path().display()).cyan());
        }
        StoreBackend::Postgres => match config.store.resolved_database_url() {
            Some(url) => {
                let normalized = normalize_database_url(&url);
                eprintln!("  URL: {}", style(redact_password(&normalized.url)).cyan());
            }
            None => eprintln!("  URL: {}", style("not set").red()),
        },
    }
    eprintln!(
        "  Max Connections: {}",
        style(config.store.max_connections).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Provider: {}", style(config.embedding.provider).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    match config.embedding.provider {
        EmbeddingProviderKind::Ollama => match config.embedding.ollama.ollama_url() {
            Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
            Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
        },
        EmbeddingProviderKind::OpenAi => {
            eprintln!(
                "  Base URL: {}",
                style(&config.embedding.openai_base_url).cyan()
            );
            let key_state = if config.embedding.resolved_openai_api_key().is_some() {
                style("set").green()
            } else {
                style("missing").red()
            };
            eprintln!("  API Key: {}", key_state);
        }
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    Config::load_default().map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            let base_dir = Config::config_dir().context("Failed to resolve config directory")?;
            Ok(Config {
                base_dir,
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let backends = [StoreBackend::Sqlite, StoreBackend::Postgres, StoreBackend::LanceDb];
    let labels = [
        "sqlite (local file, in-process ranking)",
        "postgres (pgvector)",
        "lancedb (local vector index)",
    ];
    let default_index = backends
        .iter()
        .position(|&b| b == store.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Store backend")
        .default(default_index)
        .items(&labels)
        .interact()?;
    store.backend = backends[backend_index];

    if store.backend == StoreBackend::Postgres {
        let url: String = Input::new()
            .with_prompt("Database URL")
            .default(
                store
                    .database_url
                    .clone()
                    .unwrap_or_else(|| "postgresql://postgres@localhost:5432/docuchat".to_string()),
            )
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.trim().is_empty() {
                    Err("Database URL cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;
        store.database_url = Some(url);
    }

    let max_connections: u32 = Input::new()
        .with_prompt("Maximum pooled connections")
        .default(store.max_connections)
        .validate_with(|input: &u32| -> Result<(), ConfigError> {
            StoreConfig {
                max_connections: *input,
                ..StoreConfig::default()
            }
            .validate()
        })
        .interact_text()?;
    store.max_connections = max_connections;

    Ok(())
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let providers = [EmbeddingProviderKind::OpenAi, EmbeddingProviderKind::Ollama];
    let labels = ["openai", "ollama"];
    let default_index = providers
        .iter()
        .position(|&p| p == embedding.provider)
        .unwrap_or(0);

    let provider_index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(&labels)
        .interact()?;
    embedding.provider = providers[provider_index];

    if embedding.provider == EmbeddingProviderKind::Ollama {
        configure_ollama(&mut embedding.ollama)?;
    }

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension)
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Chunks per embedding request")
        .default(embedding.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    embedding.set_model(model)?;
    embedding.set_dimension(dimension)?;
    embedding.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                port: 11434,
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;

    Ok(())
}

fn test_ollama_connection(embedding: &EmbeddingConfig) -> bool {
    OllamaProvider::new(embedding)
        .map(|provider| provider.with_retry_attempts(1))
        .and_then(|provider| provider.list_models())
        .is_ok()
}

/// Hide the password component of a connection URL for display.
fn redact_password(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // Only fails for cannot-be-a-base URLs, which carry no password.
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}
