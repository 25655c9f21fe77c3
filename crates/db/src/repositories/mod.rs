use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use dealpilot_core::domain::agent::{AgentAlert, AgentKind, AlertStatus, ExecutionId};
use dealpilot_core::domain::execution::AgentExecutionRecord;

pub mod alert;
pub mod execution;
pub mod memory;

pub use alert::SqlAgentAlertRepository;
pub use execution::SqlAgentExecutionRepository;
pub use memory::{InMemoryAgentAlertRepository, InMemoryAgentExecutionRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AgentAlertRepository: Send + Sync {
    /// Inserts the alert. Creating an id that already exists is a no-op.
    async fn create(&self, alert: AgentAlert) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<AgentAlert>, RepositoryError>;

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<AlertStatus>,
    ) -> Result<Vec<AgentAlert>, RepositoryError>;

    /// Returns `false` when no alert with `id` exists.
    async fn update_status(
        &self,
        id: &str,
        status: AlertStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AgentExecutionRepository: Send + Sync {
    async fn create(&self, record: AgentExecutionRecord) -> Result<(), RepositoryError>;

    async fn find_by_execution_id(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<AgentExecutionRecord>, RepositoryError>;

    /// Most recent records first.
    async fn list_for_agent(
        &self,
        agent_kind: &AgentKind,
        limit: u32,
    ) -> Result<Vec<AgentExecutionRecord>, RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
