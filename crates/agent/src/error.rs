use thiserror::Error;

use dealpilot_core::domain::agent::ExecutionId;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("not in execution context")]
    NotInExecution,
    #[error("LLM call limit exceeded: {0}")]
    LlmCallLimit(u32),
    #[error("LLM token limit exceeded: {0}")]
    TokenLimit(u64),
    #[error("LLM request failed: {0:#}")]
    Llm(anyhow::Error),
    #[error("Failed to parse LLM response as JSON")]
    JsonNotFound,
    #[error("invalid JSON in LLM response: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("execution `{0}` was cancelled")]
    Cancelled(ExecutionId),
    #[error("Agent execution timeout")]
    Timeout,
    #[error("execution `{0}` is already active")]
    DuplicateExecution(ExecutionId),
    #[error("agent panicked: {0}")]
    Panicked(String),
    #[error("llm client configuration error: {0}")]
    ClientConfig(String),
}
