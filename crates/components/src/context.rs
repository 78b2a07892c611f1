//! Context window management — trimming and model window lookups.

use tracing::warn;

use crate::state::{Message, Role};

/// Context window sizes by model prefix (longest-prefix-first).
const MODEL_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    // Anthropic
    ("claude-3-5-sonnet", 200_000),
    ("claude-3-5-haiku", 200_000),
    ("claude-3-opus", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-opus-4", 200_000),
    ("claude-haiku-4", 200_000),
    ("claude", 200_000),
    // OpenAI
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_384),
    ("o3-mini", 200_000),
    ("o1-mini", 128_000),
    ("o1", 200_000),
    ("o3", 200_000),
];

pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Safety margin subtracted from every budget.
const SAFETY_MARGIN_TOKENS: usize = 512;

/// Return the context window size for a model name via prefix match.
pub fn get_context_window(model_name: &str) -> usize {
    if model_name.is_empty() {
        return DEFAULT_CONTEXT_WINDOW;
    }
    let lower = model_name.to_lowercase();
    for (prefix, window) in MODEL_CONTEXT_WINDOWS {
        if lower.starts_with(prefix) {
            return *window;
        }
    }
    DEFAULT_CONTEXT_WINDOW
}

/// Rough token estimate: four characters per token, plus a small per-message
/// overhead for role framing.
fn estimate_tokens(message: &Message) -> usize {
    let mut chars = message.content.len();
    for call in &message.tool_calls {
        chars += call.name.len() + call.arguments.to_string().len();
    }
    chars / 4 + 4
}

/// Trim a message list to fit the model's context window.
///
/// Keeps the most recent whole messages, always keeps the system message,
/// and starts the retained tail on a human turn. Returns the original list
/// unchanged when it already fits.
pub fn trim_messages_for_model(
    messages: &[Message],
    model_name: &str,
    max_completion_tokens: Option<usize>,
    context_window_override: Option<usize>,
) -> Vec<Message> {
    let context_window = match context_window_override {
        Some(window) if window > 0 => window,
        _ => get_context_window(model_name),
    };
    let completion_reserve =
        max_completion_tokens.unwrap_or_else(|| std::cmp::min(16_384, context_window / 4));

    let Some(budget) = context_window
        .checked_sub(completion_reserve)
        .and_then(|b| b.checked_sub(SAFETY_MARGIN_TOKENS))
    else {
        warn!(
            model = model_name,
            window = context_window,
            reserve = completion_reserve,
            "context budget non-positive; skipping trim"
        );
        return messages.to_vec();
    };

    let total: usize = messages.iter().map(estimate_tokens).sum();
    if total <= budget {
        return messages.to_vec();
    }

    let system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .cloned()
        .collect();
    let system_tokens: usize = system.iter().map(estimate_tokens).sum();
    let tail_budget = budget.saturating_sub(system_tokens);

    // Walk backwards accumulating whole non-system messages.
    let non_system: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();
    let mut used = 0usize;
    let mut keep_from = non_system.len();
    for (idx, msg) in non_system.iter().enumerate().rev() {
        let cost = estimate_tokens(msg);
        if used + cost > tail_budget {
            break;
        }
        used += cost;
        keep_from = idx;
    }

    // Advance to a human turn so the model never resumes mid-exchange.
    while keep_from < non_system.len() && non_system[keep_from].role != Role::Human {
        keep_from += 1;
    }

    let mut trimmed = system;
    trimmed.extend(non_system[keep_from..].iter().map(|m| (*m).clone()));

    if trimmed.len() < messages.len() {
        warn!(
            model = model_name,
            from = messages.len(),
            to = trimmed.len(),
            budget,
            "trimmed conversation history"
        );
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human(text: &str) -> Message {
        Message::human(text)
    }

    fn ai(text: &str) -> Message {
        Message::ai(text)
    }

    #[test]
    fn window_lookup_prefers_longest_prefix() {
        assert_eq!(get_context_window("gpt-4-turbo-preview"), 128_000);
        assert_eq!(get_context_window("gpt-4-0613"), 8_192);
        assert_eq!(get_context_window("claude-sonnet-4-5"), 200_000);
        assert_eq!(get_context_window("something-else"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn short_history_is_untouched() {
        let messages = vec![Message::system("sys"), human("hi"), ai("hello")];
        let trimmed = trim_messages_for_model(&messages, "gpt-4o", None, None);
        assert_eq!(trimmed, messages);
    }

    #[test]
    fn trimming_keeps_system_and_starts_on_human() {
        let mut messages = vec![Message::system("sys")];
        for i in 0..200 {
            messages.push(human(&format!("question {i} {}", "x".repeat(400))));
            messages.push(ai(&format!("answer {i} {}", "y".repeat(400))));
        }
        // Force a tiny window so trimming must kick in.
        let trimmed = trim_messages_for_model(&messages, "test-model", Some(100), Some(4_000));

        assert!(trimmed.len() < messages.len());
        assert_eq!(trimmed[0].role, Role::System);
        let first_tail = trimmed.iter().find(|m| m.role != Role::System).unwrap();
        assert_eq!(first_tail.role, Role::Human);
        // Most recent exchange survives.
        assert_eq!(trimmed.last().unwrap().content, messages.last().unwrap().content);
    }

    #[test]
    fn degenerate_budget_returns_original() {
        let messages = vec![human("hi")];
        let trimmed = trim_messages_for_model(&messages, "m", Some(1_000_000), Some(2_000));
        assert_eq!(trimmed, messages);
    }
}
