//! Provider token-usage adapters.
//!
//! Each chat-completion API reports token counts under its own field names.
//! The adapters below deserialize exactly one provider's shape and convert it
//! into the canonical [`TokenUsage`], recomputing `total` instead of trusting
//! any total the provider sent.

use serde::Deserialize;

use dealpilot_core::domain::agent::TokenUsage;

/// `usage` object of an OpenAI-compatible chat completion.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// `usage` object of an Anthropic messages response.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Ollama reports counters at the top level of the `/api/chat` response.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct OllamaUsage {
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(usage: OpenAiUsage) -> Self {
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

impl From<AnthropicUsage> for TokenUsage {
    fn from(usage: AnthropicUsage) -> Self {
        TokenUsage::new(usage.input_tokens, usage.output_tokens)
    }
}

impl From<OllamaUsage> for TokenUsage {
    fn from(usage: OllamaUsage) -> Self {
        TokenUsage::new(usage.prompt_eval_count, usage.eval_count)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use dealpilot_core::domain::agent::TokenUsage;

    use super::{AnthropicUsage, OllamaUsage, OpenAiUsage};

    #[test]
    fn openai_usage_ignores_reported_total() {
        let usage: OpenAiUsage = serde_json::from_value(json!({
            "prompt_tokens": 120,
            "completion_tokens": 30,
            "total_tokens": 999
        }))
        .expect("openai usage");

        assert_eq!(TokenUsage::from(usage), TokenUsage { input: 120, output: 30, total: 150 });
    }

    #[test]
    fn anthropic_usage_maps_input_and_output() {
        let usage: AnthropicUsage =
            serde_json::from_value(json!({"input_tokens": 80, "output_tokens": 20}))
                .expect("anthropic usage");

        assert_eq!(TokenUsage::from(usage), TokenUsage::new(80, 20));
    }

    #[test]
    fn ollama_usage_reads_top_level_counters() {
        let usage: OllamaUsage = serde_json::from_value(json!({
            "model": "llama3.1",
            "message": {"role": "assistant", "content": "ok"},
            "prompt_eval_count": 41,
            "eval_count": 9,
            "done": true
        }))
        .expect("ollama usage");

        assert_eq!(TokenUsage::from(usage).total, 50);
    }

    #[test]
    fn missing_counters_default_to_zero() {
        let usage: OllamaUsage = serde_json::from_value(json!({"done": true})).expect("usage");
        assert_eq!(TokenUsage::from(usage), TokenUsage::default());
    }
}
