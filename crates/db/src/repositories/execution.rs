use sqlx::{sqlite::SqliteRow, Row};

use dealpilot_core::domain::agent::{
    AgentErrorEntry, AgentKind, ExecutionId, ExecutionStatus, TokenUsage, TriggerType,
};
use dealpilot_core::domain::execution::{AgentExecutionRecord, ExecutionRecordId};

use super::{
    parse_timestamp, parse_u32, parse_u64, to_i64, AgentExecutionRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlAgentExecutionRepository {
    pool: DbPool,
}

impl SqlAgentExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentExecutionRepository for SqlAgentExecutionRepository {
    async fn create(&self, record: AgentExecutionRecord) -> Result<(), RepositoryError> {
        let errors_json = serde_json::to_string(&record.errors)
            .map_err(|error| RepositoryError::Decode(format!("could not encode errors: {error}")))?;

        sqlx::query(
            "INSERT INTO agent_execution (
                id,
                execution_id,
                agent_kind,
                trigger_type,
                entity_type,
                entity_id,
                user_id,
                status,
                started_at,
                completed_at,
                duration_ms,
                llm_calls,
                tokens_input,
                tokens_output,
                tokens_total,
                insights_count,
                alerts_count,
                actions_count,
                errors_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id.0)
        .bind(&record.execution_id.0)
        .bind(record.agent_kind.as_str())
        .bind(record.trigger_type.as_str())
        .bind(record.entity_type.as_deref())
        .bind(record.entity_id.as_deref())
        .bind(record.user_id.as_deref())
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.to_rfc3339())
        .bind(to_i64(record.duration_ms))
        .bind(i64::from(record.llm_calls))
        .bind(to_i64(record.tokens_used.input))
        .bind(to_i64(record.tokens_used.output))
        .bind(to_i64(record.tokens_used.total))
        .bind(i64::from(record.insights_count))
        .bind(i64::from(record.alerts_count))
        .bind(i64::from(record.actions_count))
        .bind(errors_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_execution_id(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<AgentExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM agent_execution WHERE execution_id = ? ORDER BY completed_at ASC",
        )
        .bind(&execution_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn list_for_agent(
        &self,
        agent_kind: &AgentKind,
        limit: u32,
    ) -> Result<Vec<AgentExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM agent_execution
             WHERE agent_kind = ?
             ORDER BY completed_at DESC
             LIMIT ?",
        )
        .bind(agent_kind.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: SqliteRow) -> Result<AgentExecutionRecord, RepositoryError> {
    let trigger_raw = row.try_get::<String, _>("trigger_type")?;
    let trigger_type = TriggerType::parse(&trigger_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown trigger type `{trigger_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ExecutionStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown execution status `{status_raw}`"))
    })?;

    let errors_raw = row.try_get::<String, _>("errors_json")?;
    let errors = serde_json::from_str::<Vec<AgentErrorEntry>>(&errors_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `errors_json`: {error}"))
    })?;

    Ok(AgentExecutionRecord {
        id: ExecutionRecordId(row.try_get("id")?),
        execution_id: ExecutionId(row.try_get("execution_id")?),
        agent_kind: AgentKind(row.try_get("agent_kind")?),
        trigger_type,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        user_id: row.try_get("user_id")?,
        status,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        completed_at: parse_timestamp("completed_at", row.try_get("completed_at")?)?,
        duration_ms: parse_u64("duration_ms", row.try_get("duration_ms")?)?,
        llm_calls: parse_u32("llm_calls", row.try_get("llm_calls")?)?,
        tokens_used: TokenUsage {
            input: parse_u64("tokens_input", row.try_get("tokens_input")?)?,
            output: parse_u64("tokens_output", row.try_get("tokens_output")?)?,
            total: parse_u64("tokens_total", row.try_get("tokens_total")?)?,
        },
        insights_count: parse_u32("insights_count", row.try_get("insights_count")?)?,
        alerts_count: parse_u32("alerts_count", row.try_get("alerts_count")?)?,
        actions_count: parse_u32("actions_count", row.try_get("actions_count")?)?,
        errors,
    })
}
