//! Merging of streamed backend output into transcripts.
//!
//! Assistant text arrives as deltas and is concatenated onto a trailing
//! assistant message. Tool results are final values keyed by call id and
//! replace any earlier result for the same call. Everything else appends.

use tracing::{debug, trace};

use crate::invoke::Generation;
use crate::types::{ChatMessage, ChatRole, Fragment};

use super::registry::SessionRegistry;

/// Apply one piece of output to a message list.
pub fn merge_fragment(
    messages: &mut Vec<ChatMessage>,
    role: ChatRole,
    content: &str,
    tool_call_id: Option<&str>,
) {
    match (role, tool_call_id) {
        (ChatRole::Tool, Some(call_id)) if !call_id.is_empty() => {
            let existing = messages
                .iter_mut()
                .rev()
                .find(|m| m.role == ChatRole::Tool && m.tool_call_id.as_deref() == Some(call_id));
            match existing {
                Some(message) => message.content = content.to_string(),
                None => messages.push(ChatMessage::tool(call_id, content)),
            }
        }
        (ChatRole::Assistant, _) => match messages.last_mut() {
            Some(last) if last.role == ChatRole::Assistant => last.content.push_str(content),
            _ => messages.push(ChatMessage::assistant(content)),
        },
        _ => messages.push(ChatMessage {
            role,
            content: content.to_string(),
            tool_call_id: None,
        }),
    }
}

impl SessionRegistry {
    /// Merge output into the named session. Unknown sessions drop the fragment.
    pub fn append_fragment(
        &mut self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        tool_call_id: Option<&str>,
    ) {
        match self.session_mut(session_id) {
            Some(session) => merge_fragment(&mut session.messages, role, content, tool_call_id),
            None => debug!(%session_id, %role, "dropping fragment for unknown session"),
        }
    }

    pub fn apply_fragment(&mut self, fragment: &Fragment) {
        self.append_fragment(
            &fragment.session_id,
            fragment.role,
            &fragment.content,
            fragment.tool_call_id.as_deref(),
        );
    }

    /// Roll back the final message of a session, e.g. after a failed generation.
    pub fn remove_last_message(&mut self, session_id: &str) {
        if let Some(session) = self.session_mut(session_id) {
            if let Some(removed) = session.messages.pop() {
                debug!(%session_id, role = %removed.role, "removed last message");
            }
        }
    }
}

/// Apply every fragment of a generation in delivery order.
///
/// Returns how many fragments were applied once the backend closes the stream.
pub async fn drain(registry: &mut SessionRegistry, mut generation: Generation) -> usize {
    let mut applied = 0;
    while let Some(fragment) = generation.next().await {
        trace!(session_id = %fragment.session_id, role = %fragment.role, "applying fragment");
        registry.apply_fragment(&fragment);
        applied += 1;
    }
    debug!(
        session_id = %generation.session_id(),
        applied,
        stopped = generation.stopped(),
        "generation finished"
    );
    applied
}
