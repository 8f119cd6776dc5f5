//! Request-shape heuristics.
//!
//! Multi-intent detection is a deliberately crude English substring check.
//! False positives and negatives are expected; it only steers which repair
//! passes are worth attempting.

use hr_protocol::{ChatMessage, MessageContent, Role};

const MULTI_INTENT_SEPARATORS: &[&str] = &[" and then ", " then ", " and also ", ", and ", " also "];

/// Text of the newest user message that has any.
///
/// Plain string content is returned as-is (even when empty). Part lists are
/// reduced to their text parts; a list with no text is skipped in favour of
/// older user messages.
pub fn extract_latest_user_text(messages: &[ChatMessage]) -> String {
    for message in messages.iter().rev().filter(|m| m.role == Role::User) {
        match &message.content {
            Some(MessageContent::Text(text)) => return text.clone(),
            Some(content @ MessageContent::Parts(_)) => {
                let text = content.text();
                if !text.is_empty() {
                    return text;
                }
            }
            None => {}
        }
    }
    String::new()
}

/// 2 when the latest user text joins several actions, otherwise 1.
pub fn estimate_expected_action_count(messages: &[ChatMessage]) -> usize {
    let text = extract_latest_user_text(messages).to_lowercase();
    if MULTI_INTENT_SEPARATORS
        .iter()
        .any(|separator| text.contains(separator))
    {
        2
    } else {
        1
    }
}

pub fn is_multi_intent_request(messages: &[ChatMessage]) -> bool {
    estimate_expected_action_count(messages) > 1
}

/// True if the newest user message carries an image part.
pub fn latest_user_has_image(messages: &[ChatMessage]) -> bool {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.as_ref())
        .is_some_and(MessageContent::has_image)
}
