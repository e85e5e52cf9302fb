mod function;
mod message;
mod ollama;
mod options;

pub use function::{FunctionCall, FunctionDefinition, FunctionParam, Tool, ToolCall, ToolFunction};
pub use message::{ChatMessage, ChatRole, ChatSession, Fragment, OutboundMessage};
pub use ollama::{
    OllamaDeleteRequest, OllamaEmbedRequest, OllamaEmbedResponse, OllamaMessage, OllamaPullRequest, OllamaRequest,
    OllamaResponse, OllamaRunOptions, OllamaTag, OllamaTags,
};
pub use options::InvocationOptions;
