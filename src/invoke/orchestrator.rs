use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::chat::{FunctionRegistry, SessionRegistry};
use crate::config::RetrievalConfig;
use crate::error::{ChatError, Result};
use crate::types::{ChatRole, InvocationOptions, OutboundMessage};

use super::backend::{Generation, InferenceBackend, RunRequest, StopRequest};
use super::retrieval::RetrievalAugmenter;

/// Provider that cannot stream while tool calling is active.
pub const OLLAMA_PROVIDER: &str = "ollama";

/// Apply per-provider capability quirks to a private copy of the options.
pub fn prepare_options(provider: &str, options: &InvocationOptions) -> InvocationOptions {
    let mut prepared = options.clone();
    if provider == OLLAMA_PROVIDER && prepared.uses_functions() {
        prepared.streaming_enabled = false;
    }
    prepared
}

/// Builds requests from session state and hands them to the backend.
pub struct Orchestrator {
    backend: Arc<dyn InferenceBackend>,
    retrieval: RetrievalAugmenter,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn InferenceBackend>, retrieval: RetrievalConfig) -> Self {
        Orchestrator {
            backend,
            retrieval: RetrievalAugmenter::new(retrieval),
        }
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Submit the active transcript for generation.
    ///
    /// `prompt` is the latest user input; it is only used as the retrieval
    /// query when `files` is non-empty. The caller is expected to have added
    /// it to the transcript already.
    pub async fn run_model(
        &self,
        sessions: &SessionRegistry,
        provider: &str,
        model: &str,
        prompt: &str,
        options: &InvocationOptions,
        files: &[PathBuf],
    ) -> Result<Generation> {
        let options = prepare_options(provider, options);

        let session = sessions.active_session().ok_or(ChatError::NoActiveSession)?;
        let mut messages: Vec<OutboundMessage> =
            session.messages.iter().map(|m| m.project()).collect();

        if !files.is_empty() {
            let context = self
                .retrieval
                .fetch_context(self.backend.as_ref(), prompt, files)
                .await?;
            match messages.last_mut() {
                Some(last) => last.content.push_str(&context),
                None => messages.push(OutboundMessage {
                    role: ChatRole::User,
                    content: format!("{}{}", prompt, context),
                }),
            }
        }

        let request = RunRequest {
            provider: provider.to_string(),
            model: model.to_string(),
            messages,
            options,
            session_id: session.id().to_string(),
        };

        info!(
            %provider,
            %model,
            session_id = %request.session_id,
            messages = request.messages.len(),
            stream = request.options.streaming_enabled,
            "dispatching generation"
        );
        debug!(options = ?request.options, "run options");

        self.backend.run_model(request).await.map_err(|e| {
            error!("failed to start model '{}' on '{}': {}", model, provider, e);
            e
        })
    }

    /// Ask the backend to stop generating for (provider, model).
    pub async fn stop_model(
        &self,
        provider: &str,
        model: &str,
        prompt: &str,
        options: &InvocationOptions,
    ) -> Result<()> {
        info!(%provider, %model, "requesting stop");
        let request = StopRequest {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            options: options.clone(),
        };

        self.backend.stop_model(request).await.map_err(|e| {
            error!("failed to stop model '{}' on '{}': {}", model, provider, e);
            e
        })
    }

    /// Refresh the local catalog. On failure the current catalog is kept.
    pub async fn fetch_available_functions(&self, functions: &mut FunctionRegistry) -> Result<()> {
        match self.backend.available_functions().await {
            Ok(fetched) => {
                debug!(count = fetched.len(), "fetched function catalog");
                functions.replace_all(fetched);
                Ok(())
            }
            Err(e) => {
                error!("failed to fetch available functions: {}", e);
                Err(e)
            }
        }
    }

    pub async fn installed_models(&self, provider: &str) -> Result<Vec<String>> {
        self.backend.installed_models(provider).await.map_err(|e| {
            error!("failed to list models for '{}': {}", provider, e);
            e
        })
    }

    pub async fn download_model(&self, provider: &str, model: &str, url: Option<&str>) -> Result<()> {
        info!(%provider, %model, "requesting model download");
        self.backend
            .download_model(provider, model, url)
            .await
            .map_err(|e| {
                error!("failed to download '{}' via '{}': {}", model, provider, e);
                e
            })
    }

    pub async fn delete_model(&self, provider: &str, model: &str) -> Result<()> {
        info!(%provider, %model, "requesting model deletion");
        self.backend.delete_model(provider, model).await.map_err(|e| {
            error!("failed to delete '{}' via '{}': {}", model, provider, e);
            e
        })
    }

    pub async fn available_providers(&self) -> Result<Vec<String>> {
        let providers = self.backend.available_providers().await.map_err(|e| {
            error!("failed to list providers: {}", e);
            e
        })?;
        debug!(?providers, "available providers");
        Ok(providers)
    }
}
