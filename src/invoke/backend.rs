//! The inference backend as seen from the engine.
//!
//! Every call is a suspension point that resolves once the backend has
//! acknowledged the request. Generated output never comes back through a
//! return value; it arrives later through the [`Generation`] handle.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ChatRole, Fragment, FunctionDefinition, InvocationOptions, OutboundMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<OutboundMessage>,
    pub options: InvocationOptions,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub options: InvocationOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalRequest {
    pub model_name: String,
    pub query_text: String,
    pub file_paths: Vec<PathBuf>,
    pub segment_size: usize,
    pub top_n: usize,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Names of the providers this backend can route to.
    async fn available_providers(&self) -> Result<Vec<String>>;

    async fn installed_models(&self, provider: &str) -> Result<Vec<String>>;

    async fn download_model(&self, provider: &str, model: &str, url: Option<&str>) -> Result<()>;

    async fn delete_model(&self, provider: &str, model: &str) -> Result<()>;

    /// Function catalog; the `enabled` flag of each entry is meaningless here.
    async fn available_functions(&self) -> Result<Vec<FunctionDefinition>>;

    async fn retrieve_context(&self, request: RetrievalRequest) -> Result<String>;

    /// Submit a generation. Returns once the request is accepted.
    async fn run_model(&self, request: RunRequest) -> Result<Generation>;

    /// Ask the provider to halt whatever it is generating for `model`.
    async fn stop_model(&self, request: StopRequest) -> Result<()>;
}

/// Subscription to the fragments of one submitted generation.
///
/// The stream ends when the backend drops its [`FragmentSender`]. A stream
/// cut short by a stop request reports [`Generation::stopped`] afterwards.
#[derive(Debug)]
pub struct Generation {
    session_id: String,
    receiver: mpsc::UnboundedReceiver<Fragment>,
    stopped: Arc<AtomicBool>,
}

impl Generation {
    pub fn channel(session_id: impl Into<String>) -> (FragmentSender, Generation) {
        let session_id = session_id.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        (
            FragmentSender {
                session_id: session_id.clone(),
                sender,
                stopped: stopped.clone(),
            },
            Generation {
                session_id,
                receiver,
                stopped,
            },
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next fragment in delivery order, or `None` once the backend is done.
    pub async fn next(&mut self) -> Option<Fragment> {
        self.receiver.recv().await
    }

    /// True once the backend ended this generation because of a stop request.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Backend half of a [`Generation`].
#[derive(Debug, Clone)]
pub struct FragmentSender {
    session_id: String,
    sender: mpsc::UnboundedSender<Fragment>,
    stopped: Arc<AtomicBool>,
}

impl FragmentSender {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns false once the consumer has gone away.
    pub fn push(&self, role: ChatRole, content: impl Into<String>, tool_call_id: Option<String>) -> bool {
        self.sender
            .send(Fragment {
                session_id: self.session_id.clone(),
                role,
                content: content.into(),
                tool_call_id,
            })
            .is_ok()
    }

    pub fn assistant(&self, content: impl Into<String>) -> bool {
        self.push(ChatRole::Assistant, content, None)
    }

    pub fn tool(&self, tool_call_id: impl Into<String>, content: impl Into<String>) -> bool {
        self.push(ChatRole::Tool, content, Some(tool_call_id.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Record that output ended early on request. Call before dropping.
    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
