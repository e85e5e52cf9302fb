//! End-to-end: orchestrator dispatch, backend push, aggregation into the registry.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use parlor::chat::{drain, SessionRegistry};
use parlor::config::RetrievalConfig;
use parlor::error::{ChatError, Result};
use parlor::invoke::{
    Generation, InferenceBackend, Orchestrator, RetrievalRequest, RunRequest, StopRequest,
};
use parlor::types::{ChatMessage, ChatRole, FunctionDefinition, InvocationOptions};

/// Replays a fixed fragment script for every run.
struct ScriptedBackend {
    script: Vec<(ChatRole, &'static str, Option<&'static str>)>,
    runs: Mutex<Vec<RunRequest>>,
    retrievals: Mutex<Vec<RetrievalRequest>>,
    stops: Mutex<Vec<StopRequest>>,
}

impl ScriptedBackend {
    fn new(script: Vec<(ChatRole, &'static str, Option<&'static str>)>) -> Arc<Self> {
        Arc::new(ScriptedBackend {
            script,
            runs: Mutex::new(Vec::new()),
            retrievals: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn available_providers(&self) -> Result<Vec<String>> {
        Ok(vec!["ollama".to_string()])
    }

    async fn delete_model(&self, _provider: &str, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn installed_models(&self, provider: &str) -> Result<Vec<String>> {
        match provider {
            "ollama" => Ok(vec!["llama3".to_string()]),
            other => Err(ChatError::ProviderNotFound(other.to_string())),
        }
    }

    async fn download_model(&self, _provider: &str, _model: &str, _url: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn available_functions(&self) -> Result<Vec<FunctionDefinition>> {
        Ok(Vec::new())
    }

    async fn retrieve_context(&self, request: RetrievalRequest) -> Result<String> {
        self.retrievals.lock().unwrap().push(request);
        Ok("\n\nsnippet".to_string())
    }

    async fn run_model(&self, request: RunRequest) -> Result<Generation> {
        let (sender, generation) = Generation::channel(request.session_id.clone());
        self.runs.lock().unwrap().push(request);

        let script = self.script.clone();
        tokio::spawn(async move {
            for (role, content, id) in script {
                sender.push(role, content, id.map(str::to_string));
                tokio::task::yield_now().await;
            }
        });
        Ok(generation)
    }

    async fn stop_model(&self, request: StopRequest) -> Result<()> {
        self.stops.lock().unwrap().push(request);
        Ok(())
    }
}

fn orchestrator(backend: Arc<ScriptedBackend>) -> Orchestrator {
    Orchestrator::new(backend, RetrievalConfig::default())
}

#[tokio::test]
async fn streamed_reply_collapses_into_one_assistant_message() {
    let backend = ScriptedBackend::new(vec![
        (ChatRole::Assistant, "Hel", None),
        (ChatRole::Assistant, "lo", None),
    ]);
    let orchestrator = orchestrator(backend.clone());

    let mut sessions = SessionRegistry::new();
    let id = sessions.create_session(None);
    sessions.add_message(ChatMessage::user("hi"));

    let options = InvocationOptions::default();
    let generation = orchestrator
        .run_model(&sessions, "ollama", "llama3", "hi", &options, &[])
        .await
        .unwrap();
    assert_eq!(drain(&mut sessions, generation).await, 2);

    let messages = &sessions.session(&id).unwrap().messages;
    assert_eq!(
        messages,
        &vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello")]
    );
    assert!(backend.runs.lock().unwrap()[0].options.streaming_enabled);
}

#[tokio::test]
async fn tool_round_keeps_results_keyed_by_call_id() {
    let backend = ScriptedBackend::new(vec![
        (ChatRole::Assistant, "Checking", None),
        (ChatRole::Tool, "partial", Some("t1")),
        (ChatRole::Tool, "final", Some("t1")),
        (ChatRole::Assistant, "It is ", None),
        (ChatRole::Assistant, "noon.", None),
    ]);
    let orchestrator = orchestrator(backend.clone());

    let mut sessions = SessionRegistry::new();
    let id = sessions.create_session(None);
    sessions.add_message(ChatMessage::user("what time is it?"));

    let options = InvocationOptions {
        enabled_functions: vec!["f1".to_string()],
        streaming_enabled: true,
        ..InvocationOptions::default()
    };
    let generation = orchestrator
        .run_model(&sessions, "ollama", "llama3", "what time is it?", &options, &[])
        .await
        .unwrap();
    drain(&mut sessions, generation).await;

    let messages = &sessions.session(&id).unwrap().messages;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1], ChatMessage::assistant("Checking"));
    assert_eq!(messages[2], ChatMessage::tool("t1", "final"));
    assert_eq!(messages[3], ChatMessage::assistant("It is noon."));

    // dispatched copy lost streaming, caller's copy did not
    assert!(!backend.runs.lock().unwrap()[0].options.streaming_enabled);
    assert!(options.streaming_enabled);
}

#[tokio::test]
async fn output_follows_its_session_after_switching() {
    let backend = ScriptedBackend::new(vec![(ChatRole::Assistant, "for A", None)]);
    let orchestrator = orchestrator(backend);

    let mut sessions = SessionRegistry::new();
    let a = sessions.create_session(Some("A"));
    sessions.add_message(ChatMessage::user("question"));

    let generation = orchestrator
        .run_model(&sessions, "ollama", "llama3", "question", &InvocationOptions::default(), &[])
        .await
        .unwrap();

    let b = sessions.create_session(Some("B"));
    drain(&mut sessions, generation).await;

    assert_eq!(sessions.active_session_id(), Some(b.as_str()));
    assert!(sessions.session(&b).unwrap().messages.is_empty());
    assert_eq!(
        sessions.session(&a).unwrap().last_message(),
        Some(&ChatMessage::assistant("for A"))
    );
}

#[tokio::test]
async fn attached_files_extend_the_last_message() {
    let backend = ScriptedBackend::new(Vec::new());
    let orchestrator = orchestrator(backend.clone());

    let mut sessions = SessionRegistry::new();
    sessions.create_session(None);
    sessions.add_message(ChatMessage::user("summarize"));

    let files = vec![PathBuf::from("notes.txt")];
    let generation = orchestrator
        .run_model(&sessions, "ollama", "llama3", "summarize", &InvocationOptions::default(), &files)
        .await
        .unwrap();
    assert_eq!(drain(&mut sessions, generation).await, 0);

    let runs = backend.runs.lock().unwrap();
    assert_eq!(runs[0].messages.last().unwrap().content, "summarize\n\nsnippet");
    // the transcript itself is untouched
    assert_eq!(sessions.active_messages()[0].content, "summarize");

    let retrievals = backend.retrievals.lock().unwrap();
    assert_eq!(retrievals[0].query_text, "summarize");
    assert_eq!(retrievals[0].file_paths, files);
}

#[tokio::test]
async fn stop_and_model_listing_pass_through() {
    let backend = ScriptedBackend::new(Vec::new());
    let orchestrator = orchestrator(backend.clone());

    orchestrator
        .stop_model("ollama", "llama3", "hi", &InvocationOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.stops.lock().unwrap()[0].model, "llama3");

    assert_eq!(orchestrator.installed_models("ollama").await.unwrap(), vec!["llama3"]);
    assert!(matches!(
        orchestrator.installed_models("other").await,
        Err(ChatError::ProviderNotFound(_))
    ));
}

#[tokio::test]
async fn run_without_active_session_is_rejected() {
    let orchestrator = orchestrator(ScriptedBackend::new(Vec::new()));
    let sessions = SessionRegistry::new();

    let result = orchestrator
        .run_model(&sessions, "ollama", "llama3", "hi", &InvocationOptions::default(), &[])
        .await;
    assert!(matches!(result, Err(ChatError::NoActiveSession)));
}
