use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Upstream view of the message: bookkeeping fields are dropped.
    pub fn project(&self) -> OutboundMessage {
        OutboundMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// What actually goes over the wire for each transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: ChatRole,
    pub content: String,
}

/// An independent chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: String, title: String, created_at: DateTime<Utc>) -> Self {
        ChatSession {
            id,
            title,
            messages: Vec::new(),
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// One incremental piece of backend output addressed to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Fragment {
    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Fragment {
            session_id: session_id.into(),
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Fragment {
            session_id: session_id.into(),
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_drops_tool_call_id() {
        let msg = ChatMessage::tool("call_1", "42");
        let out = msg.project();
        assert_eq!(out.role, ChatRole::Tool);
        assert_eq!(out.content, "42");

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "tool", "content": "42" }));
    }

    #[test]
    fn fragment_deserializes_without_tool_call_id() {
        let fragment: Fragment = serde_json::from_str(
            r#"{"session_id":"abc","role":"assistant","content":"Hi"}"#,
        )
        .unwrap();
        assert_eq!(fragment, Fragment::assistant("abc", "Hi"));
    }
}
