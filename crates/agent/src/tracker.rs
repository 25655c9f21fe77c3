use tracing::{debug, warn};

use dealpilot_core::domain::agent::{AgentContext, AgentKind, AgentResult};
use dealpilot_core::domain::execution::AgentExecutionRecord;
use dealpilot_db::AgentExecutionRepository;

/// Persists the audit row for a finished run. Failures are logged, never raised.
pub(crate) async fn track_execution(
    executions: &dyn AgentExecutionRepository,
    kind: &AgentKind,
    context: &AgentContext,
    result: &AgentResult,
) {
    let record = AgentExecutionRecord::from_result(kind, context, result);
    let record_id = record.id.0.clone();
    match executions.create(record).await {
        Ok(()) => debug!(
            execution_id = %context.execution_id,
            record_id = %record_id,
            "execution record stored"
        ),
        Err(error) => warn!(
            execution_id = %context.execution_id,
            agent_kind = %kind,
            error = %error,
            "failed to store execution record"
        ),
    }
}
