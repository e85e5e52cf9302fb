//! Embedding-based context retrieval over local files.

use reqwest::Client;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::invoke::RetrievalRequest;
use crate::types::{OllamaEmbedRequest, OllamaEmbedResponse};

pub struct Retriever {
    client: Client,
    base_url: String,
    cache: Option<EmbeddingCache>,
}

impl Retriever {
    pub fn new(base_url: impl Into<String>) -> Self {
        Retriever {
            client: Client::new(),
            base_url: base_url.into(),
            cache: None,
        }
    }

    /// Keep embeddings on disk under `dir`, keyed by model and text.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache = Some(EmbeddingCache::new(dir));
        self
    }

    /// Top-N file segments most similar to the query, as one text blob.
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<String> {
        let mut segments = Vec::new();
        for path in &request.file_paths {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ChatError::Retrieval(format!("{}: {}", path.display(), e)))?;
            segments.extend(segment_text(&text, request.segment_size));
        }
        if segments.is_empty() {
            return Ok(String::new());
        }

        let mut inputs = Vec::with_capacity(segments.len() + 1);
        inputs.push(request.query_text.clone());
        inputs.extend(segments.iter().cloned());

        let embeddings = self.embed_cached(&request.model_name, inputs).await?;
        let Some((query, segment_embeddings)) = embeddings.split_first() else {
            return Err(ChatError::Retrieval("empty embedding response".to_string()));
        };
        if segment_embeddings.len() != segments.len() {
            return Err(ChatError::Retrieval(format!(
                "expected {} embeddings, got {}",
                segments.len() + 1,
                embeddings.len()
            )));
        }

        let top = rank_segments(query, segments, segment_embeddings, request.top_n);
        debug!(selected = top.len(), "retrieved context segments");
        Ok(format_context(&top))
    }

    /// Embed `inputs`, asking the server only for texts missing from the cache.
    async fn embed_cached(&self, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let Some(cache) = &self.cache else {
            return self.embed(model, inputs).await;
        };

        let mut embeddings = Vec::with_capacity(inputs.len());
        let mut misses = Vec::new();
        for (index, text) in inputs.iter().enumerate() {
            let hit = cache.load(model, text).await;
            if hit.is_none() {
                misses.push(index);
            }
            embeddings.push(hit.unwrap_or_default());
        }
        debug!(hits = inputs.len() - misses.len(), misses = misses.len(), "embedding cache lookup");
        if misses.is_empty() {
            return Ok(embeddings);
        }

        let texts: Vec<String> = misses.iter().map(|&i| inputs[i].clone()).collect();
        let fetched = self.embed(model, texts).await?;
        if fetched.len() != misses.len() {
            return Err(ChatError::Retrieval(format!(
                "expected {} embeddings, got {}",
                misses.len(),
                fetched.len()
            )));
        }
        for (index, embedding) in misses.into_iter().zip(fetched) {
            cache.store(model, &inputs[index], &embedding).await;
            embeddings[index] = embedding;
        }
        Ok(embeddings)
    }

    async fn embed(&self, model: &str, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = OllamaEmbedRequest {
            model: model.to_string(),
            input,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Retrieval(format!(
                "embedding request failed: {} - {}",
                status, text
            )));
        }

        let parsed: OllamaEmbedResponse = serde_json::from_str(&text)?;
        Ok(parsed.embeddings)
    }
}

/// On-disk embedding store: one little-endian `f32` file per (model, text).
///
/// Cache trouble is never fatal; unreadable entries count as misses.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        EmbeddingCache { dir: dir.into() }
    }

    pub fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn path(&self, model: &str, text: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", Self::key(model, text)))
    }

    pub async fn load(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let raw = tokio::fs::read(self.path(model, text)).await.ok()?;
        if raw.is_empty() || raw.len() % 4 != 0 {
            return None;
        }
        Some(
            raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }

    pub async fn store(&self, model: &str, text: &str, embedding: &[f32]) {
        let bytes: Vec<u8> = embedding.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = self.path(model, text);
        let written = match tokio::fs::create_dir_all(&self.dir).await {
            Ok(()) => tokio::fs::write(&path, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(path = %path.display(), "failed to cache embedding: {}", e);
        }
    }
}

/// Split text into runs of at most `size` whitespace-separated words.
pub fn segment_text(text: &str, size: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(size.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Most similar segments first; ties keep file order.
pub fn rank_segments(
    query: &[f32],
    segments: Vec<String>,
    embeddings: &[Vec<f32>],
    top_n: usize,
) -> Vec<String> {
    let mut scored: Vec<(f32, String)> = segments
        .into_iter()
        .zip(embeddings)
        .map(|(segment, embedding)| (cosine(query, embedding), segment))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.into_iter().take(top_n).map(|(_, s)| s).collect()
}

/// Leading blank line so the blob can be glued straight onto a prompt.
fn format_context(segments: &[String]) -> String {
    if segments.is_empty() {
        return String::new();
    }
    format!("\n\n{}", segments.join("\n\n"))
}
