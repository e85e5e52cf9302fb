use serde::{Deserialize, Serialize};

use super::function::{Tool, ToolCall};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaRunOptions {
    pub num_gpu: u32,
    pub num_ctx: u32,
}

#[derive(Debug, Serialize)]
pub struct OllamaRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    pub stream: bool,
    pub options: OllamaRunOptions,
}

/// One NDJSON line of `/api/chat`, or the whole body when not streaming.
#[derive(Debug, Deserialize)]
pub struct OllamaResponse {
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaTags {
    pub models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaTag {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct OllamaPullRequest {
    pub name: String,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct OllamaDeleteRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct OllamaEmbedRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaEmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}
