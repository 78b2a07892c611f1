//! Token usage extraction, pricing, and cost calculation.

use serde::{Deserialize, Serialize};

/// Pricing table: (model prefix, input USD per 1M tokens, output USD per 1M).
/// Ordered longest-prefix-first so specific prefixes match before generic ones.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    // OpenAI
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("o3-mini", 1.10, 4.40),
    ("o1-mini", 3.00, 12.00),
    ("o1", 15.00, 60.00),
    // Anthropic
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-opus", 15.00, 75.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-opus-4", 15.00, 75.00),
];

/// Per-call (or accumulated) usage counters. All fields sum under merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub llm_calls: i64,
    #[serde(default)]
    pub tool_invocations: i64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl TokenUsage {
    /// Usage of one LLM call with the given token counts, costed for `model`.
    pub fn for_call(model: &str, input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            llm_calls: 1,
            tool_invocations: 0,
            cost_usd: calculate_cost(model, input_tokens, output_tokens),
        }
    }

    /// Sum all numeric fields of two usage records.
    pub fn merged(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            llm_calls: self.llm_calls + other.llm_calls,
            tool_invocations: self.tool_invocations + other.tool_invocations,
            cost_usd: self.cost_usd + other.cost_usd,
        }
    }

    pub fn fold(&mut self, other: Self) {
        *self = self.merged(other);
    }
}

/// Return `(input_usd_per_1M, output_usd_per_1M)` for a model name via
/// prefix match. Unknown models return `(0.0, 0.0)` — tokens are tracked
/// but cost is $0.
pub fn get_model_pricing(model_name: &str) -> (f64, f64) {
    if model_name.is_empty() {
        return (0.0, 0.0);
    }
    let lower = model_name.to_lowercase();
    for (prefix, input_cost, output_cost) in MODEL_PRICING {
        if lower.starts_with(prefix) {
            return (*input_cost, *output_cost);
        }
    }
    (0.0, 0.0)
}

/// USD cost for a given model and token counts.
pub fn calculate_cost(model_name: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let (input_rate, output_rate) = get_model_pricing(model_name);
    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}

/// Sum usage across AI messages that carry usage metadata, counting each
/// as one LLM call.
pub fn extract_usage_from_messages(messages: &[crate::state::Message]) -> TokenUsage {
    let mut total = TokenUsage::default();
    for msg in messages {
        if msg.role != crate::state::Role::Ai {
            continue;
        }
        let Some(usage) = msg.usage_metadata else {
            continue;
        };
        total.input_tokens += usage.input_tokens;
        total.output_tokens += usage.output_tokens;
        total.llm_calls += 1;
    }
    total.total_tokens = total.input_tokens + total.output_tokens;
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Message;

    #[test]
    fn specific_prefix_wins_over_generic() {
        let (mini_in, _) = get_model_pricing("gpt-4o-mini-2024-07-18");
        assert_eq!(mini_in, 0.15);
        let (full_in, _) = get_model_pricing("gpt-4o-2024-08-06");
        assert_eq!(full_in, 2.50);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        assert_eq!(get_model_pricing("my-local-llm"), (0.0, 0.0));
        assert_eq!(calculate_cost("my-local-llm", 1000, 1000), 0.0);
    }

    #[test]
    fn cost_is_per_million_tokens() {
        // gpt-4o: 2.50 in / 10.00 out per 1M
        let cost = calculate_cost("gpt-4o", 1_000_000, 500_000);
        assert!((cost - (2.50 + 5.00)).abs() < 1e-9);
    }

    #[test]
    fn usage_merge_sums_all_fields() {
        let a = TokenUsage::for_call("gpt-4o", 100, 50);
        let b = TokenUsage::for_call("gpt-4o", 10, 5);
        let merged = a.merged(b);
        assert_eq!(merged.input_tokens, 110);
        assert_eq!(merged.output_tokens, 55);
        assert_eq!(merged.total_tokens, 165);
        assert_eq!(merged.llm_calls, 2);
    }

    #[test]
    fn extract_counts_only_ai_messages_with_usage() {
        let mut ai = Message::ai("ok");
        ai.usage_metadata = Some(TokenUsage {
            input_tokens: 7,
            output_tokens: 3,
            total_tokens: 10,
            ..Default::default()
        });
        let messages = vec![Message::human("hi"), ai, Message::ai("no usage")];
        let usage = extract_usage_from_messages(&messages);
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 3);
        assert_eq!(usage.llm_calls, 1);
        assert_eq!(usage.total_tokens, 10);
    }
}
