#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Configuration-driven runs against mocked embedding services

mod common;

use common::{KeywordProvider, chunks};
use docuchat::ErrorKind;
use docuchat::commands::prepare_chunks;
use docuchat::config::{Config, EmbeddingConfig, EmbeddingProviderKind, OllamaConfig, StoreConfig};
use docuchat::database::StoreBackend;
use docuchat::manager::{EmbeddingManager, build_context};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Deserialize)]
struct EmbedRequest {
    input: Vec<String>,
}

/// Answers embedding requests the way the keyword stub would
struct KeywordResponder {
    openai: bool,
}

impl Respond for KeywordResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = request.body_json::<EmbedRequest>() else {
            return ResponseTemplate::new(400);
        };
        let vectors: Vec<Vec<f32>> = body
            .input
            .iter()
            .map(|text| KeywordProvider::vector_for(text))
            .collect();

        if self.openai {
            let data: Vec<_> = vectors
                .iter()
                .enumerate()
                .map(|(index, embedding)| json!({"object": "embedding", "index": index, "embedding": embedding}))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": data}))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": vectors}))
        }
    }
}

fn ollama_config(server: &MockServer, dir: &TempDir, backend: StoreBackend) -> Config {
    let address = server.address();
    Config {
        store: StoreConfig {
            backend,
            max_connections: 2,
            ..StoreConfig::default()
        },
        embedding: EmbeddingConfig {
            provider: EmbeddingProviderKind::Ollama,
            model: "nomic-embed-text".to_string(),
            dimension: 3,
            batch_size: 2,
            ollama: OllamaConfig {
                protocol: "http".to_string(),
                host: address.ip().to_string(),
                port: address.port(),
            },
            ..EmbeddingConfig::default()
        },
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

fn openai_config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        embedding: EmbeddingConfig {
            provider: EmbeddingProviderKind::OpenAi,
            dimension: 3,
            batch_size: 1,
            openai_base_url: format!("{}/v1", server.uri()),
            openai_api_key: Some("sk-test".to_string()),
            ..EmbeddingConfig::default()
        },
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

async fn mount_ollama() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(KeywordResponder { openai: false })
        .mount(&server)
        .await;
    server
}

async fn initialized(config: &Config) -> EmbeddingManager {
    let mut manager = EmbeddingManager::from_config(config)
        .await
        .expect("should build manager");
    manager.initialize().await.expect("should initialize");
    manager
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_document_round_trip_through_ollama() {
    let server = mount_ollama().await;
    let dir = TempDir::new().expect("should create temp dir");
    let config = ollama_config(&server, &dir, StoreBackend::Sqlite);

    let document = dir.path().join("pets.txt");
    std::fs::write(
        &document,
        "Cats are independent and sleep most of the day.\n\nDogs are loyal companions that love to fetch.",
    )
    .expect("should write document");

    let (name, document_chunks) =
        prepare_chunks(&config, &document, None).expect("should prepare chunks");
    assert_eq!(name, "pets.txt");

    let manager = initialized(&config).await;
    let report = manager
        .store_document_embeddings(&document_chunks, &name)
        .await
        .expect("should ingest");
    assert_eq!(report.chunks_stored, document_chunks.len());

    let results = manager
        .similarity_search("tell me about cats", 1)
        .await
        .expect("should search");
    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("Cats"));

    let context = build_context(&results);
    assert!(context.starts_with("Document: pets.txt\nRelevance: 1.000\nContent: "));
    assert!(context.ends_with("\n---"));

    manager.shutdown().await;
    assert!(config.sqlite_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lancedb_backend_from_config() {
    let server = mount_ollama().await;
    let dir = TempDir::new().expect("should create temp dir");
    let config = ollama_config(&server, &dir, StoreBackend::LanceDb);

    let manager = initialized(&config).await;
    manager
        .store_document_embeddings(&chunks("a.pdf", &["dogs", "cats"]), "a.pdf")
        .await
        .expect("should ingest");

    let results = manager
        .similarity_search("dog", 1)
        .await
        .expect("should search");
    assert_eq!(results[0].content, "dogs");
    manager.shutdown().await;
    assert!(config.lancedb_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dimension_mismatch_with_configured_model_fails() {
    let server = mount_ollama().await;
    let dir = TempDir::new().expect("should create temp dir");
    let config = ollama_config(&server, &dir, StoreBackend::Sqlite);

    let manager = initialized(&config).await;
    manager
        .store_document_embeddings(&chunks("a.pdf", &["cats"]), "a.pdf")
        .await
        .expect("should ingest");
    manager.shutdown().await;

    // the existing store was created for 3 dimensions
    let mut wider = config.clone();
    wider.embedding.dimension = 4;
    let mut manager = EmbeddingManager::from_config(&wider)
        .await
        .expect("should build manager");
    let error = manager.initialize().await.expect_err("should refuse");
    assert_eq!(error.kind(), ErrorKind::Storage);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn openai_rate_limit_keeps_previous_generation() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("should create temp dir");
    let config = openai_config(&server, &dir);

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(KeywordResponder { openai: true })
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit reached"))
        .mount(&server)
        .await;

    let manager = initialized(&config).await;
    manager
        .store_document_embeddings(&chunks("a.pdf", &["old cats"]), "a.pdf")
        .await
        .expect("first request succeeds");

    // batch size 1: the second batch hits the rate limit after retries
    let error = manager
        .store_document_embeddings(&chunks("a.pdf", &["new cats", "new dogs"]), "a.pdf")
        .await
        .expect_err("should hit rate limit");
    assert_eq!(error.kind(), ErrorKind::Provider);
    assert!(error.is_retryable());

    let rows = manager
        .store()
        .document_rows("a.pdf")
        .await
        .expect("should load rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "old cats");
}

#[tokio::test]
async fn invalid_config_is_rejected_before_opening_anything() {
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.embedding.batch_size = 0;

    let error = EmbeddingManager::from_config(&config)
        .await
        .err()
        .expect("should reject config");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(!config.sqlite_path().exists());
}
