//! Conversation window sent to the gateway.
//!
//! The small on-device model has a tight context budget, so only the most
//! recent user/assistant turns are forwarded, flattened to plain text.

use hr_protocol::{ChatMessage, Role};
use serde::Serialize;

/// Maximum user/assistant turns forwarded to the gateway.
pub const MAX_HISTORY_MESSAGES: usize = 6;

/// Roles the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayRole {
    System,
    User,
    Assistant,
}

/// A text-only message on the gateway wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayMessage {
    pub role: GatewayRole,
    pub content: String,
}

/// Build the gateway window from a chat history.
///
/// Non-empty system messages come first, in order, followed by the last
/// [`MAX_HISTORY_MESSAGES`] non-empty user/assistant messages. Tool-result
/// messages and non-text content parts are dropped.
pub fn build_window(messages: &[ChatMessage]) -> Vec<GatewayMessage> {
    let mut system = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => GatewayRole::System,
            Role::User => GatewayRole::User,
            Role::Assistant => GatewayRole::Assistant,
            Role::Tool => continue,
        };

        let content = message.text();
        if content.is_empty() {
            continue;
        }

        let entry = GatewayMessage { role, content };
        if role == GatewayRole::System {
            system.push(entry);
        } else {
            turns.push(entry);
        }
    }

    let skip = turns.len().saturating_sub(MAX_HISTORY_MESSAGES);
    system.extend(turns.into_iter().skip(skip));
    system
}
