use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use tracing::{info, warn};

use crate::chunking::{Chunk, JsonSource, TextSplitter, load_json_source, pages_to_text};
use crate::config::{Config, EmbeddingConfig, EmbeddingProviderKind};
use crate::embeddings::{OllamaProvider, OpenAiProvider};
use crate::manager::{EmbeddingManager, build_context};

/// Build the manager for `config` and initialize its store.
#[inline]
pub async fn open_manager(config: &Config) -> Result<EmbeddingManager> {
    let mut manager = EmbeddingManager::from_config(config)
        .await
        .context("Failed to open document store")?
        .with_progress(true);

    manager
        .initialize()
        .await
        .context("Failed to initialize document store")?;

    Ok(manager)
}

/// Where the chunks of an ingestion come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// JSON array of chunk records, or of page strings to mark and split
    ChunkFile,
    /// Plain text, split with the configured chunking settings
    Text,
}

impl SourceFormat {
    /// `.json` files are chunk files, anything else is text.
    #[inline]
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => SourceFormat::ChunkFile,
            _ => SourceFormat::Text,
        }
    }
}

/// Load the chunks for `path` and settle on the document name they are stored under.
///
/// The name is `filename` when given, else the name recorded in a chunk file,
/// else the file name of `path`. Every chunk is relabelled with the result.
#[inline]
pub fn prepare_chunks(
    config: &Config,
    path: &Path,
    filename: Option<String>,
) -> Result<(String, Vec<Chunk>)> {
    let fallback_name = || {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    };

    match SourceFormat::detect(path) {
        SourceFormat::ChunkFile => match load_json_source(path)? {
            JsonSource::Chunks(mut chunks) => {
                let name = filename
                    .or_else(|| chunks.first().map(|c| c.metadata.filename.clone()))
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(fallback_name);

                for chunk in &mut chunks {
                    if chunk.metadata.filename != name {
                        chunk.metadata.filename.clone_from(&name);
                    }
                }
                Ok((name, chunks))
            }
            JsonSource::Pages(pages) => {
                let name = filename.unwrap_or_else(fallback_name);
                let text = pages_to_text(&pages);
                let chunks = TextSplitter::new(config.chunking.clone()).create_chunks(&text, &name);
                Ok((name, chunks))
            }
        },
        SourceFormat::Text => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read document: {}", path.display()))?;
            let name = filename.unwrap_or_else(fallback_name);
            let chunks = TextSplitter::new(config.chunking.clone()).create_chunks(&text, &name);
            Ok((name, chunks))
        }
    }
}

/// Embed a document and make it the stored generation for its name
#[inline]
pub async fn ingest_document(config: &Config, path: &Path, filename: Option<String>) -> Result<()> {
    let (name, chunks) = prepare_chunks(config, path, filename)?;

    if chunks.is_empty() {
        warn!("{} produced no chunks", path.display());
    }

    let manager = open_manager(config).await?;
    let result = manager.store_document_embeddings(&chunks, &name).await;
    manager.shutdown().await;
    let report = result.with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!(
        "{} {}",
        style("✓ Stored").green(),
        style(&report.filename).cyan()
    );
    println!("  Chunks: {}", report.chunks_stored);
    println!("  Batches: {}", report.batches);
    if report.replaced_rows > 0 {
        println!("  Replaced previous chunks: {}", report.replaced_rows);
    }

    Ok(())
}

/// Print the `k` chunks closest to `query`, or the rendered context block.
#[inline]
pub async fn search_documents(config: &Config, query: &str, k: usize, as_context: bool) -> Result<()> {
    let manager = open_manager(config).await?;
    let result = manager.similarity_search(query, k).await;
    manager.shutdown().await;
    let results = result.context("Search failed")?;

    if results.is_empty() {
        println!("No documents stored yet.");
        return Ok(());
    }

    if as_context {
        println!("{}", build_context(&results));
        return Ok(());
    }

    for (rank, chunk) in results.iter().enumerate() {
        println!(
            "{}. {} {}",
            rank + 1,
            style(&chunk.filename).cyan(),
            style(format!("({:.3})", chunk.similarity)).dim()
        );
        println!("   {}", preview(&chunk.content, 200));
        println!();
    }

    Ok(())
}

#[inline]
pub async fn list_documents(config: &Config) -> Result<()> {
    let manager = open_manager(config).await?;
    let result = manager.document_summaries().await;
    manager.shutdown().await;
    let summaries = result.context("Failed to list documents")?;

    if summaries.is_empty() {
        println!("No documents stored yet.");
        println!("Use 'docuchat ingest <file>' to add one.");
        return Ok(());
    }

    println!("Stored documents:");
    println!();
    for summary in &summaries {
        println!(
            "📄 {} - {} chunks",
            style(&summary.filename).cyan(),
            summary.chunk_count
        );
    }
    println!();
    println!("Total: {} documents", summaries.len());

    Ok(())
}

#[inline]
pub async fn delete_document(config: &Config, filename: &str, assume_yes: bool) -> Result<()> {
    if !assume_yes && !confirm(&format!("Delete '{}' and all its chunks?", filename))? {
        println!("Nothing deleted.");
        return Ok(());
    }

    let manager = open_manager(config).await?;
    let result = manager.delete_document(filename).await;
    manager.shutdown().await;

    if result.context("Failed to delete document")? {
        println!("{} {}", style("✓ Deleted").green(), filename);
    } else {
        println!("{} {}", style("Not found:").yellow(), filename);
    }
    Ok(())
}

#[inline]
pub async fn delete_all_documents(config: &Config, assume_yes: bool) -> Result<()> {
    if !assume_yes && !confirm("Delete every stored document? This cannot be undone.")? {
        println!("Nothing deleted.");
        return Ok(());
    }

    let manager = open_manager(config).await?;
    let result = manager.delete_all_documents().await;
    manager.shutdown().await;
    let deleted = result.context("Failed to delete documents")?;

    println!("{} {} chunks", style("✓ Deleted").green(), deleted);
    Ok(())
}

/// Show the store backend, ranking strategy and stored documents
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Docuchat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Store:");
    println!("   Backend: {}", config.store.backend);

    let manager = match open_manager(config).await {
        Ok(manager) => manager,
        Err(e) => {
            println!("   ❌ Unavailable - {:#}", e);
            return Ok(());
        }
    };

    if let Some(strategy) = manager.strategy() {
        println!("   ✅ Connected, {} ranking", strategy);
    }

    println!();
    println!("🤖 Embeddings:");
    println!("   Provider: {}", config.embedding.provider);
    println!("   Model: {}", config.embedding.model);
    println!("   Dimension: {}", config.embedding.dimension);
    println!("   Batch size: {}", manager.batch_size());
    match check_provider(&config.embedding).await {
        Ok(()) => println!("   ✅ Provider ready"),
        Err(e) => println!("   ⚠️  Provider unavailable - {:#}", e),
    }

    let summaries = manager.document_summaries().await;
    let rows = manager.store().count_rows().await;
    manager.shutdown().await;

    println!();
    println!("📚 Documents:");
    match (summaries, rows) {
        (Ok(summaries), Ok(rows)) => {
            println!("   Documents: {}", summaries.len());
            println!("   Chunks: {}", rows);
        }
        (Err(e), _) | (_, Err(e)) => println!("   ⚠️  Could not read store - {}", e),
    }

    Ok(())
}

/// Check that the configured provider can serve embeddings.
///
/// Ollama must answer and list the configured model. OpenAI is only checked
/// for a usable key and base URL, no billable request is made.
#[inline]
pub async fn check_provider(config: &EmbeddingConfig) -> Result<()> {
    match config.provider {
        EmbeddingProviderKind::Ollama => {
            let provider = OllamaProvider::new(config)?.with_retry_attempts(1);
            tokio::task::spawn_blocking(move || provider.health_check())
                .await
                .context("Ollama health check did not complete")?
        }
        EmbeddingProviderKind::OpenAi => {
            OpenAiProvider::new(config)?;
            Ok(())
        }
    }
}

/// Rebuild indexes and compact storage where the backend supports it
#[inline]
pub async fn optimize_store(config: &Config) -> Result<()> {
    let manager = open_manager(config).await?;
    info!("Optimizing {} store", config.store.backend);
    let result = manager.optimize().await;
    manager.shutdown().await;
    result.context("Failed to optimize store")?;

    println!("{}", style("✓ Store optimized").green());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// First `max_chars` characters of `content` on one line
#[inline]
pub fn preview(content: &str, max_chars: usize) -> String {
    let flattened = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }

    let mut truncated: String = flattened.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn source_format_detection() {
        assert_eq!(
            SourceFormat::detect(Path::new("chunks.json")),
            SourceFormat::ChunkFile
        );
        assert_eq!(
            SourceFormat::detect(Path::new("CHUNKS.JSON")),
            SourceFormat::ChunkFile
        );
        assert_eq!(SourceFormat::detect(Path::new("notes.txt")), SourceFormat::Text);
        assert_eq!(SourceFormat::detect(Path::new("README")), SourceFormat::Text);
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n\nb  c", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc…");
    }

    #[test]
    fn text_files_are_split_under_their_file_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("notes.txt");
        fs::write(&path, "cats purr.\n\ndogs bark.").expect("should write document");

        let (name, chunks) =
            prepare_chunks(&Config::default(), &path, None).expect("should prepare chunks");
        assert_eq!(name, "notes.txt");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.metadata.filename == "notes.txt"));

        let (name, _) = prepare_chunks(&Config::default(), &path, Some("renamed.pdf".to_string()))
            .expect("should prepare chunks");
        assert_eq!(name, "renamed.pdf");
    }

    #[test]
    fn chunk_files_keep_their_recorded_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("export.json");
        let chunks = vec![Chunk::new("page one", "report.pdf", 0, 2), Chunk::new("page two", "report.pdf", 1, 2)];
        fs::write(
            &path,
            serde_json::to_string(&chunks).expect("should serialize chunks"),
        )
        .expect("should write chunk file");

        let (name, loaded) =
            prepare_chunks(&Config::default(), &path, None).expect("should prepare chunks");
        assert_eq!(name, "report.pdf");
        assert_eq!(loaded.len(), 2);

        let (name, relabelled) =
            prepare_chunks(&Config::default(), &path, Some("final.pdf".to_string()))
                .expect("should prepare chunks");
        assert_eq!(name, "final.pdf");
        assert!(relabelled.iter().all(|c| c.metadata.filename == "final.pdf"));
    }

    #[test]
    fn page_files_are_marked_and_split() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("report.json");
        fs::write(&path, r#"["cats purr.", "dogs bark."]"#).expect("should write pages");

        let (name, chunks) =
            prepare_chunks(&Config::default(), &path, None).expect("should prepare chunks");
        assert_eq!(name, "report.json");
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].content,
            "--- Page 1 ---\ncats purr.\n--- Page 2 ---\ndogs bark."
        );
        assert!(chunks.iter().all(|c| c.metadata.filename == "report.json"));
    }

    fn ollama_config(server: &MockServer, model: &str) -> EmbeddingConfig {
        let url = Url::parse(&server.uri()).expect("should parse mock server url");
        let mut config = Config::default().embedding;
        config.provider = EmbeddingProviderKind::Ollama;
        config.model = model.to_string();
        config.ollama.host = url.host_str().expect("should have host").to_string();
        config.ollama.port = url.port().expect("should have port");
        config
    }

    async fn ollama_tags_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "nomic-embed-text:latest"}]
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ollama_check_finds_configured_model() {
        let server = ollama_tags_server().await;

        check_provider(&ollama_config(&server, "nomic-embed-text:latest"))
            .await
            .expect("should pass provider check");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ollama_check_reports_missing_model() {
        let server = ollama_tags_server().await;

        let err = check_provider(&ollama_config(&server, "all-minilm"))
            .await
            .expect_err("should fail for an unlisted model");
        let message = format!("{:#}", err);
        assert!(message.contains("all-minilm"), "{}", message);
        assert!(message.contains("nomic-embed-text:latest"), "{}", message);
    }

    #[tokio::test]
    async fn ollama_check_reports_unreachable_server() {
        let mut config = Config::default().embedding;
        config.provider = EmbeddingProviderKind::Ollama;
        config.ollama.port = 9;

        assert!(check_provider(&config).await.is_err());
    }

    #[test]
    fn missing_document_is_an_error() {
        let result = prepare_chunks(&Config::default(), Path::new("/nonexistent/doc.txt"), None);
        assert!(result.is_err());
    }
}
