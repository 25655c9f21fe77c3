//! Agent Runtime - budgeted, time-boxed execution of LLM-backed agents
//!
//! This crate runs the autonomous agents of the DealPilot CRM. It owns the
//! lifecycle every agent shares, while the agent itself only supplies its
//! analysis logic through the [`Agent`] trait.
//!
//! # Lifecycle
//!
//! `AgentRunner::execute(context)` drives one run:
//! 1. **Admission** (`rate_limit`) - hourly and daily counters per agent kind
//! 2. **Registration** (`registry`) - fresh per-run state behind an [`AgentRun`] handle
//! 3. **Supervision** (`supervisor`) - agent logic raced against `max_execution_time_ms`
//! 4. **Result** (`run`) - state snapshot into an `AgentResult`
//! 5. **Audit** (`tracker`) - one `AgentExecutionRecord` per run
//!
//! Lifecycle events `agent.execution.started`, `agent.execution.completed` and
//! `agent.alert.created` go to the configured [`EventBus`].
//!
//! # Budgets
//!
//! Every run is limited in LLM calls, tokens, alerts and actions. LLM budget
//! violations are errors the agent sees; alert and action overflow is dropped
//! with a warning.
//!
//! # Failure Model
//!
//! `execute` never returns an error. Agent errors, panics, timeouts and budget
//! violations all end the run as `FAILED` with an `EXECUTION_ERROR` entry.

pub mod connectors;
pub mod error;
pub mod events;
pub mod llm;
pub mod rate_limit;
pub mod registry;
pub mod run;
pub mod runtime;
pub mod services;
mod supervisor;
mod tracker;
pub mod usage;

pub use connectors::{ConnectionStatus, ConnectorSet, CrmConnector, CrmProvider, GuardedConnector};
pub use error::AgentError;
pub use events::{AgentEvent, BroadcastEventBus, EventBus, InMemoryEventBus};
pub use llm::{ChatCompletion, ChatMessage, HttpLlmClient, LlmCallOptions, LlmClient};
pub use rate_limit::RateLimiter;
pub use registry::{ExecutionRegistry, ExecutionSnapshot};
pub use run::{AgentRun, ALERT_PERSIST_FAILED};
pub use runtime::{Agent, AgentRunner};
pub use services::AgentServices;
