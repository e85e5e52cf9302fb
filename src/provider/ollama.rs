use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, Result};
use crate::invoke::{FragmentSender, RunRequest};
use crate::tools::FunctionCatalog;
use crate::types::{
    OllamaDeleteRequest, OllamaMessage, OllamaPullRequest, OllamaRequest, OllamaResponse, OllamaRunOptions, OllamaTags,
    Tool, ToolCall,
};

use super::ndjson::LineBuffer;
use super::ModelProvider;

pub struct OllamaProvider {
    client: Arc<OllamaClient>,
}

/// How a generation's background task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Stopped,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, catalog: Arc<FunctionCatalog>, max_tool_rounds: usize) -> Self {
        let base_url = base_url.into();
        info!(%base_url, "initializing ollama provider");
        OllamaProvider {
            client: Arc::new(OllamaClient {
                http: Client::new(),
                base_url,
                catalog,
                stop_flag: AtomicBool::new(false),
                max_tool_rounds,
            }),
        }
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn installed_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.client.base_url);
        let response = self.client.http.get(&url).send().await?;
        let tags: OllamaTags = read_json(response).await?;

        let names: Vec<String> = tags.models.into_iter().map(|t| t.name).collect();
        debug!(?names, "installed models");
        Ok(names)
    }

    async fn download_model(&self, model: &str, url: Option<&str>) -> Result<()> {
        if let Some(url) = url {
            warn!(%url, "ollama pulls by name; ignoring download url");
        }
        let endpoint = format!("{}/api/pull", self.client.base_url);
        let body = OllamaPullRequest {
            name: model.to_string(),
            stream: false,
        };

        let response = self.client.http.post(&endpoint).json(&body).send().await?;
        let _: Value = read_json(response).await?;
        info!(%model, "model pulled");
        Ok(())
    }

    async fn delete_model(&self, model: &str) -> Result<()> {
        let endpoint = format!("{}/api/delete", self.client.base_url);
        let body = OllamaDeleteRequest {
            name: model.to_string(),
        };

        let response = self.client.http.delete(&endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Backend(format!("ollama api error: {} - {}", status, text)));
        }
        info!(%model, "model deleted");
        Ok(())
    }

    async fn run(&self, request: RunRequest, sender: FragmentSender) -> Result<()> {
        let body = self.client.build_request(&request);
        let stream = body.stream;

        self.client.stop_flag.store(false, Ordering::SeqCst);
        debug!(body = ?body, "sending chat request");

        // non-streaming replies answer only once complete; post those from the task
        let pending = if stream {
            Some(self.client.post_chat(&body).await?)
        } else {
            None
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            info!(session_id = %sender.session_id(), stream, "receiving model output");
            let outcome = match pending {
                Some(response) => client.stream_reply(response, &sender).await,
                None => client.tool_loop(body, &sender).await,
            };
            match outcome {
                Ok(RunEnd::Completed) => {
                    info!(session_id = %sender.session_id(), "model output ended")
                }
                Ok(RunEnd::Stopped) => {
                    info!(session_id = %sender.session_id(), "model stopped by request");
                    sender.mark_stopped();
                }
                Err(e) => error!(session_id = %sender.session_id(), "model output failed: {}", e),
            }
        });

        Ok(())
    }

    async fn stop(&self, model: &str) -> Result<()> {
        // one flag per provider: every in-flight generation stops, whatever the model
        self.client.stop_flag.store(true, Ordering::SeqCst);
        info!(%model, "stop flag set");
        Ok(())
    }
}

struct OllamaClient {
    http: Client,
    base_url: String,
    catalog: Arc<FunctionCatalog>,
    stop_flag: AtomicBool,
    max_tool_rounds: usize,
}

impl OllamaClient {
    fn build_request(&self, request: &RunRequest) -> OllamaRequest {
        let tools: Vec<Tool> = request
            .options
            .enabled_functions
            .iter()
            .filter_map(|name| match self.catalog.get(name) {
                Some(def) => Some(def.to_tool()),
                None => {
                    warn!(function = %name, "enabled function not in catalog");
                    None
                }
            })
            .collect();

        OllamaRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                    tool_calls: None,
                    tool_call_id: None,
                })
                .collect(),
            tools: (!tools.is_empty()).then_some(tools),
            stream: request.options.streaming_enabled,
            options: OllamaRunOptions {
                num_gpu: request.options.gpu_layers,
                num_ctx: request.options.context_window,
            },
        }
    }

    async fn post_chat(&self, body: &OllamaRequest) -> Result<Response> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Backend(format!("ollama api error: {} - {}", status, text)));
        }
        Ok(response)
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Forward each NDJSON delta as an assistant fragment.
    async fn stream_reply(&self, response: Response, sender: &FragmentSender) -> Result<RunEnd> {
        let mut chunks = response.bytes_stream();
        let mut lines = LineBuffer::new();

        while let Some(chunk) = chunks.next().await {
            if self.stopped() {
                return Ok(RunEnd::Stopped);
            }
            for line in lines.push(&chunk?) {
                if !self.forward_line(&line, sender)? {
                    return Ok(RunEnd::Completed);
                }
            }
        }
        if let Some(line) = lines.finish() {
            self.forward_line(&line, sender)?;
        }
        Ok(RunEnd::Completed)
    }

    /// Returns false when the stream is finished or nobody is listening.
    fn forward_line(&self, line: &str, sender: &FragmentSender) -> Result<bool> {
        let reply: OllamaResponse = serde_json::from_str(line)?;
        if let Some(err) = reply.error {
            return Err(ChatError::Backend(format!("ollama error: {}", err)));
        }
        if let Some(message) = reply.message {
            if message.tool_calls.is_some() {
                warn!("tool calls are not executed while streaming");
            }
            if !message.content.is_empty() && !sender.assistant(message.content) {
                debug!("generation dropped by consumer");
                return Ok(false);
            }
        }
        Ok(!reply.done)
    }

    /// Non-streaming exchange: run requested functions and re-ask until the
    /// model answers in plain text or the round budget is spent.
    async fn tool_loop(&self, mut body: OllamaRequest, sender: &FragmentSender) -> Result<RunEnd> {
        for round in 0..=self.max_tool_rounds {
            if self.stopped() {
                return Ok(RunEnd::Stopped);
            }
            let response = self.post_chat(&body).await?;
            let text = response.text().await?;
            if self.stopped() {
                return Ok(RunEnd::Stopped);
            }

            let reply: OllamaResponse = serde_json::from_str(&text)?;
            if let Some(err) = reply.error {
                return Err(ChatError::Backend(format!("ollama error: {}", err)));
            }
            let Some(message) = reply.message else {
                return Ok(RunEnd::Completed);
            };

            let calls = message.tool_calls.clone().unwrap_or_default();
            if !message.content.is_empty() {
                sender.assistant(message.content.clone());
            }
            if calls.is_empty() {
                return Ok(RunEnd::Completed);
            }
            if round == self.max_tool_rounds {
                warn!(round, "tool round budget exhausted");
                return Ok(RunEnd::Completed);
            }

            body.messages.push(message);
            for call in &calls {
                if self.stopped() {
                    return Ok(RunEnd::Stopped);
                }
                let result = self.execute_call(call).await;
                sender.tool(call.call_id(), result.clone());
                body.messages.push(OllamaMessage {
                    role: "tool".to_string(),
                    content: result,
                    tool_calls: None,
                    tool_call_id: Some(call.call_id().to_string()),
                });
            }
            debug!(round, "re-asking model with tool results");
        }
        Ok(RunEnd::Completed)
    }

    /// Function failures become the tool result text so the model can react.
    async fn execute_call(&self, call: &ToolCall) -> String {
        let name = &call.function.name;
        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(function = %name, "bad function arguments: {}", e);
                return format!("invalid arguments for {}: {}", name, e);
            }
        };

        info!(function = %name, ?args, "calling function");
        match self.catalog.execute(name, &args).await {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(function = %name, "function failed: {}", e);
                format!("function {} failed: {}", name, e)
            }
        }
    }
}

/// Arguments arrive either as a JSON object or as a string holding one.
pub fn parse_arguments(arguments: &Value) -> std::result::Result<HashMap<String, Value>, serde_json::Error> {
    match arguments {
        Value::Null => Ok(HashMap::new()),
        Value::String(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
        Value::String(raw) => serde_json::from_str(raw),
        other => serde_json::from_value(other.clone()),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(ChatError::Backend(format!("ollama api error: {} - {}", status, text)));
    }
    Ok(serde_json::from_str(&text)?)
}
