//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use exemplar_artifacts::{DecryptionKey, install_process_key};
use exemplar_embeddings::OpenAIProvider;
use exemplar_retrieval::{MetadataRecord, RetrievalConfig, Retriever};
use tracing::info;

fn retriever(config_path: &Path) -> anyhow::Result<Retriever> {
    let config = RetrievalConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let key = DecryptionKey::from_env(&config.artifacts.key_env)?;
    install_process_key(key)?;

    let mut provider = OpenAIProvider::new()?
        .with_base_url(&config.embedding.base_url)
        .with_model(&config.embedding.model)
        .with_timeout(Duration::from_secs(config.embedding.timeout_secs))?;
    if let Ok(api_key) = std::env::var(&config.embedding.api_key_env) {
        provider = provider.with_api_key(api_key);
    }
    if let Some(dimensions) = config.embedding.dimensions {
        provider = provider.with_dimensions(dimensions);
    }

    Ok(Retriever::from_config(&config, Arc::new(provider))?)
}

pub async fn query(
    config_path: &Path,
    text: &str,
    neighbors: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let retriever = retriever(config_path)?;
    let n = neighbors.unwrap_or(retriever.default_neighbors());
    let result = retriever.get_nearest_neighbors(text, n).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.is_empty() {
        println!("The index is empty.");
    }
    for (rank, hit) in result.iter().enumerate() {
        println!("#{} (ordinal {}, distance {:.4})", rank + 1, hit.ordinal, hit.distance);
        match &hit.record {
            MetadataRecord::Exemplar {
                question,
                answer,
                score,
                feedback,
            } => {
                println!("  Q: {question}");
                println!("  A: {answer}");
                if let Some(score) = score {
                    println!("  Score: {score}");
                }
                if let Some(feedback) = feedback {
                    println!("  Feedback: {feedback}");
                }
            }
            MetadataRecord::Passage { text, source } => {
                println!("  {text}");
                if let Some(source) = source {
                    println!("  Source: {source}");
                }
            }
        }
    }
    Ok(())
}

pub async fn check(config_path: &Path) -> anyhow::Result<()> {
    let retriever = retriever(config_path)?;
    let corpus = retriever.ensure_loaded().await?;
    let exemplars = corpus
        .records()
        .iter()
        .filter(|r| matches!(r, MetadataRecord::Exemplar { .. }))
        .count();
    println!("entries:   {}", corpus.len());
    println!("exemplars: {exemplars}");
    println!("passages:  {}", corpus.len() - exemplars);
    println!("dimension: {}", corpus.dimension());
    println!("metric:    {}", corpus.metric());
    Ok(())
}

pub async fn seal(key_env: &str, input: &Path, output: &Path) -> anyhow::Result<()> {
    let key = DecryptionKey::from_env(key_env)?;
    let plaintext = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let envelope = exemplar_artifacts::seal(&key, &plaintext)?;
    tokio::fs::write(output, &envelope)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    info!(
        "Sealed {} ({} bytes) into {} ({} bytes)",
        input.display(),
        plaintext.len(),
        output.display(),
        envelope.len()
    );
    Ok(())
}
