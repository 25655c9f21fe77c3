use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::warn;

use crate::error::AgentError;
use crate::run::AgentRun;
use crate::runtime::Agent;

/// Runs the agent's logic on its own task and races it against the deadline.
///
/// When the deadline wins, the run's cancellation token fires and the task is
/// aborted, dropping the agent future at its next suspension point. A panic
/// inside the agent surfaces as [`AgentError::Panicked`].
pub(crate) async fn supervise(
    agent: Arc<dyn Agent>,
    run: &AgentRun,
    deadline: Duration,
) -> anyhow::Result<()> {
    let task_run = run.clone();
    let mut task = tokio::spawn(async move { agent.execute_agent(&task_run).await });

    tokio::select! {
        joined = &mut task => match joined {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                Err(AgentError::Panicked(panic_message(join_error.into_panic())).into())
            }
            Err(join_error) => Err(anyhow!("agent task ended unexpectedly: {join_error}")),
        },
        _ = tokio::time::sleep(deadline) => {
            run.cancellation().cancel();
            task.abort();
            warn!(
                execution_id = %run.context().execution_id,
                agent_kind = %run.agent_kind(),
                deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "agent execution timed out"
            );
            Err(AgentError::Timeout.into())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
