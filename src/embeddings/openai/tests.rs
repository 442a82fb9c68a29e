use super::*;
use crate::config::EmbeddingProviderKind;
use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(base_url: &str, dimension: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: EmbeddingProviderKind::OpenAi,
        model: DEFAULT_OPENAI_MODEL.to_string(),
        dimension,
        openai_base_url: base_url.to_string(),
        openai_api_key: Some("sk-test".to_string()),
        ..EmbeddingConfig::default()
    }
}

fn provider_for(server: &MockServer, dimension: u32) -> OpenAiProvider {
    OpenAiProvider::new(&config_for(&format!("{}/v1", server.uri()), dimension))
        .expect("should build provider")
        .with_retry_attempts(2)
        .with_backoff(Duration::from_millis(1))
}

#[test]
#[serial]
fn api_key_is_required() {
    if std::env::var_os("OPENAI_API_KEY").is_some() {
        return;
    }

    let mut config = config_for(DEFAULT_OPENAI_BASE_URL, 3);
    config.openai_api_key = None;
    let error = OpenAiProvider::new(&config).expect_err("should require a key");
    assert!(matches!(error, DocuchatError::Config(_)));
}

#[test]
fn base_url_keeps_its_path() {
    let provider =
        OpenAiProvider::new(&config_for("https://proxy.internal/openai/v1", 3)).expect("should build");
    assert_eq!(
        provider.base_url().as_str(),
        "https://proxy.internal/openai/v1/"
    );

    let error = OpenAiProvider::new(&config_for("not a url", 3)).expect_err("should reject");
    assert!(matches!(error, DocuchatError::Config(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn embeddings_are_returned_in_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_json(json!({
            "model": DEFAULT_OPENAI_MODEL,
            "input": ["zero", "one"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0]}
            ],
            "model": DEFAULT_OPENAI_MODEL,
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, 3);
    let vectors = tokio::task::spawn_blocking(move || {
        provider.embed_documents(&["zero".to_string(), "one".to_string()])
    })
    .await
    .expect("task should join")
    .expect("should embed");

    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_exhaustion_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "insufficient_quota", "code": "insufficient_quota"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, 3);
    let error = tokio::task::spawn_blocking(move || provider.embed_query("hello"))
        .await
        .expect("task should join")
        .expect_err("should fail");

    assert_eq!(error.kind, ProviderErrorKind::QuotaExhausted);
    assert!(!error.is_retryable());
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limits_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit reached"))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider_for(&server, 3);
    let error = tokio::task::spawn_blocking(move || provider.embed_query("hello"))
        .await
        .expect("task should join")
        .expect_err("should fail");

    assert_eq!(error.kind, ProviderErrorKind::RateLimited);
    assert!(error.is_retryable());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_vectors_are_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, 3);
    let error = tokio::task::spawn_blocking(move || {
        provider.embed_documents(&["a".to_string(), "b".to_string()])
    })
    .await
    .expect("task should join")
    .expect_err("should fail");

    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}
