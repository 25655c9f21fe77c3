use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{
    AgentContext, AgentErrorEntry, AgentKind, AgentResult, ExecutionId, ExecutionStatus,
    TokenUsage, TriggerType,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionRecordId(pub String);

/// Durable audit row written once per finished run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentExecutionRecord {
    pub id: ExecutionRecordId,
    pub execution_id: ExecutionId,
    pub agent_kind: AgentKind,
    pub trigger_type: TriggerType,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub llm_calls: u32,
    pub tokens_used: TokenUsage,
    pub insights_count: u32,
    pub alerts_count: u32,
    pub actions_count: u32,
    pub errors: Vec<AgentErrorEntry>,
}

impl AgentExecutionRecord {
    pub fn from_result(
        agent_kind: &AgentKind,
        context: &AgentContext,
        result: &AgentResult,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_ms = result.execution_time_ms;
        let elapsed = i64::try_from(duration_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or_else(Duration::zero);
        let started_at = completed_at - elapsed;

        Self {
            id: ExecutionRecordId(uuid::Uuid::new_v4().to_string()),
            execution_id: context.execution_id.clone(),
            agent_kind: agent_kind.clone(),
            trigger_type: context.trigger_type,
            entity_type: context.entity_type.clone(),
            entity_id: context.entity_id.clone(),
            user_id: context.user_id.clone(),
            status: result.status,
            started_at,
            completed_at,
            duration_ms,
            llm_calls: result.llm_calls_count,
            tokens_used: result.tokens_used,
            insights_count: saturating_count(result.insights.len()),
            alerts_count: saturating_count(result.alerts.len()),
            actions_count: saturating_count(result.actions.len()),
            errors: result.errors.clone().unwrap_or_default(),
        }
    }
}

fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
