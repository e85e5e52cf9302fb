use std::path::PathBuf;
use tracing::{debug, error};

use crate::config::RetrievalConfig;
use crate::error::{ChatError, Result};

use super::backend::{InferenceBackend, RetrievalRequest};

/// Fetches document context for a prompt from the retrieval service.
#[derive(Debug, Clone)]
pub struct RetrievalAugmenter {
    config: RetrievalConfig,
}

impl RetrievalAugmenter {
    pub fn new(config: RetrievalConfig) -> Self {
        RetrievalAugmenter { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn request(&self, prompt: &str, files: &[PathBuf]) -> RetrievalRequest {
        RetrievalRequest {
            model_name: self.config.embedding_model.clone(),
            query_text: prompt.to_string(),
            file_paths: files.to_vec(),
            segment_size: self.config.segment_size,
            top_n: self.config.top_n,
        }
    }

    /// One retrieval round trip. Any failure comes back as [`ChatError::Retrieval`].
    pub async fn fetch_context(
        &self,
        backend: &dyn InferenceBackend,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<String> {
        let request = self.request(prompt, files);
        debug!(files = request.file_paths.len(), model = %request.model_name, "retrieving context");

        backend.retrieve_context(request).await.map_err(|e| {
            error!("context retrieval failed: {}", e);
            match e {
                ChatError::Retrieval(_) => e,
                other => ChatError::Retrieval(other.to_string()),
            }
        })
    }
}
