pub mod config;
pub mod domain;
pub mod errors;

pub use chrono;

pub use domain::agent::{
    ActionStatus, AgentAction, AgentAlert, AgentContext, AgentErrorEntry, AgentInsight, AgentKind,
    AgentLimits, AgentResult, AlertPriority, AlertStatus, ExecutionId, ExecutionStatus, NewAction,
    NewAlert, TokenUsage, TriggerType, EXECUTION_ERROR, RATE_LIMITED,
};
pub use domain::execution::{AgentExecutionRecord, ExecutionRecordId};
pub use errors::DomainError;
