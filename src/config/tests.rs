use super::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::database::StoreBackend;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            store: StoreConfig {
                backend: StoreBackend::Postgres,
                database_url: Some("postgresql://localhost/docuchat".to_string()),
                ..StoreConfig::default()
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProviderKind::Ollama,
                model: "test-model".to_string(),
                dimension: 768,
                batch_size: 32,
                ollama: OllamaConfig {
                    protocol: "https".to_string(),
                    host: "test-host".to_string(),
                    port: 8080,
                },
                ..EmbeddingConfig::default()
            },
            ..Config::default()
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn api_key_is_not_written_when_absent() {
        let config = Config::default();
        let toml_content = toml::to_string_pretty(&config).expect("should serialize");
        assert!(!toml_content.contains("openai_api_key"));
        assert!(!toml_content.contains("database_url"));
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [store
            backend = "sqlite"
            max_connections = "many"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let toml_str = "[store]\nbackend = \"mysql\"\n";
        let result: Result<Config, toml::de::Error> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn config_dir_honours_environment() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");

        // SAFETY: serialized with every other test that touches this variable.
        unsafe {
            std::env::set_var(settings::CONFIG_DIR_ENV, temp_dir.path());
        }
        let dir = Config::config_dir().expect("should resolve config dir");
        // SAFETY: see above.
        unsafe {
            std::env::remove_var(settings::CONFIG_DIR_ENV);
        }

        assert_eq!(dir, temp_dir.path());
    }
}
