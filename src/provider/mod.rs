//! In-process reference backend: routes engine calls to model providers.

pub mod embeddings;
pub mod ndjson;
pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::invoke::{FragmentSender, Generation, InferenceBackend, RetrievalRequest, RunRequest, StopRequest};
use crate::tools::FunctionCatalog;
use crate::types::FunctionDefinition;

pub use embeddings::{EmbeddingCache, Retriever};
pub use ollama::OllamaProvider;

/// One model runtime (a local server, a hosted API, ...).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn installed_models(&self) -> Result<Vec<String>>;

    async fn download_model(&self, model: &str, url: Option<&str>) -> Result<()>;

    async fn delete_model(&self, model: &str) -> Result<()>;

    /// Accept the request and hand fragments to `sender` from a background
    /// task. Must return without waiting for the output. A run cut short by
    /// [`ModelProvider::stop`] calls [`FragmentSender::mark_stopped`].
    async fn run(&self, request: RunRequest, sender: FragmentSender) -> Result<()>;

    async fn stop(&self, model: &str) -> Result<()>;
}

pub struct LocalBackend {
    providers: Vec<Arc<dyn ModelProvider>>,
    catalog: Arc<FunctionCatalog>,
    retriever: Retriever,
}

impl LocalBackend {
    pub fn new(catalog: Arc<FunctionCatalog>, retriever: Retriever) -> Self {
        LocalBackend {
            providers: Vec::new(),
            catalog,
            retriever,
        }
    }

    /// Backend with the Ollama provider wired from configuration.
    pub fn from_config(config: &Config) -> Self {
        let catalog = Arc::new(FunctionCatalog::new());
        let ollama = OllamaProvider::new(
            config.backend.base_url.clone(),
            catalog.clone(),
            config.backend.max_tool_rounds,
        );
        let mut retriever = Retriever::new(config.backend.base_url.clone());
        if let Some(dir) = &config.retrieval.cache_dir {
            retriever = retriever.with_cache_dir(dir);
        }
        LocalBackend::new(catalog, retriever).with_provider(Arc::new(ollama))
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Registered provider names, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn ModelProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| {
                warn!(provider = %name, "no such provider");
                ChatError::ProviderNotFound(name.to_string())
            })
    }
}

#[async_trait]
impl InferenceBackend for LocalBackend {
    async fn available_providers(&self) -> Result<Vec<String>> {
        Ok(self.provider_names())
    }

    async fn installed_models(&self, provider: &str) -> Result<Vec<String>> {
        self.provider(provider)?.installed_models().await
    }

    async fn download_model(&self, provider: &str, model: &str, url: Option<&str>) -> Result<()> {
        self.provider(provider)?.download_model(model, url).await
    }

    async fn delete_model(&self, provider: &str, model: &str) -> Result<()> {
        self.provider(provider)?.delete_model(model).await
    }

    async fn available_functions(&self) -> Result<Vec<FunctionDefinition>> {
        Ok(self.catalog.definitions().to_vec())
    }

    async fn retrieve_context(&self, request: RetrievalRequest) -> Result<String> {
        self.retriever.retrieve(request).await
    }

    async fn run_model(&self, request: RunRequest) -> Result<Generation> {
        let provider = self.provider(&request.provider)?;
        let (sender, generation) = Generation::channel(request.session_id.clone());
        debug!(provider = %request.provider, model = %request.model, "dispatching run");
        provider.run(request, sender).await?;
        Ok(generation)
    }

    async fn stop_model(&self, request: StopRequest) -> Result<()> {
        self.provider(&request.provider)?.stop(&request.model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fragment, InvocationOptions};
    use std::sync::Mutex;

    /// Replies with the model name split into two fragments.
    struct EchoProvider {
        stopped: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn installed_models(&self) -> Result<Vec<String>> {
            Ok(vec!["tiny".to_string()])
        }

        async fn download_model(&self, _model: &str, _url: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn delete_model(&self, model: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(model.to_string());
            Ok(())
        }

        async fn run(&self, request: RunRequest, sender: FragmentSender) -> Result<()> {
            tokio::spawn(async move {
                let (head, tail) = request.model.split_at(2);
                sender.assistant(head);
                sender.assistant(tail);
            });
            Ok(())
        }

        async fn stop(&self, model: &str) -> Result<()> {
            self.stopped.lock().unwrap().push(model.to_string());
            Ok(())
        }
    }

    fn backend() -> (LocalBackend, Arc<EchoProvider>) {
        let echo = Arc::new(EchoProvider {
            stopped: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        });
        let backend = LocalBackend::new(
            Arc::new(FunctionCatalog::new()),
            Retriever::new("http://127.0.0.1:9"),
        )
        .with_provider(echo.clone());
        (backend, echo)
    }

    fn run_request(provider: &str) -> RunRequest {
        RunRequest {
            provider: provider.to_string(),
            model: "tiny".to_string(),
            messages: Vec::new(),
            options: InvocationOptions::default(),
            session_id: "s1".to_string(),
        }
    }

    #[tokio::test]
    async fn run_routes_to_named_provider() {
        let (backend, _) = backend();
        let mut generation = backend.run_model(run_request("echo")).await.unwrap();

        assert_eq!(generation.session_id(), "s1");
        assert_eq!(generation.next().await, Some(Fragment::assistant("s1", "ti")));
        assert_eq!(generation.next().await, Some(Fragment::assistant("s1", "ny")));
        assert_eq!(generation.next().await, None);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let (backend, _) = backend();
        let err = backend.run_model(run_request("nope")).await.unwrap_err();
        assert!(matches!(err, ChatError::ProviderNotFound(name) if name == "nope"));
        assert!(backend.installed_models("nope").await.is_err());
    }

    #[tokio::test]
    async fn stop_reaches_provider_with_model() {
        let (backend, echo) = backend();
        backend
            .stop_model(StopRequest {
                provider: "echo".to_string(),
                model: "tiny".to_string(),
                prompt: String::new(),
                options: InvocationOptions::default(),
            })
            .await
            .unwrap();
        assert_eq!(*echo.stopped.lock().unwrap(), vec!["tiny".to_string()]);
    }

    #[tokio::test]
    async fn catalog_and_models_pass_through() {
        let (backend, _) = backend();
        let functions = backend.available_functions().await.unwrap();
        assert_eq!(functions.len(), 2);
        assert_eq!(backend.installed_models("echo").await.unwrap(), vec!["tiny"]);
    }

    #[tokio::test]
    async fn providers_are_listed_and_deletes_routed() {
        let (backend, echo) = backend();
        assert_eq!(backend.available_providers().await.unwrap(), vec!["echo"]);

        backend.delete_model("echo", "tiny").await.unwrap();
        assert_eq!(*echo.deleted.lock().unwrap(), vec!["tiny".to_string()]);
        assert!(matches!(
            backend.delete_model("nope", "tiny").await,
            Err(ChatError::ProviderNotFound(_))
        ));
    }
}
