use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use dealpilot_core::config::AgentsConfig;
use dealpilot_core::domain::agent::{
    AgentContext, AgentErrorEntry, AgentKind, AgentLimits, AgentResult, ExecutionStatus,
    TokenUsage, EXECUTION_ERROR,
};

use crate::events::AgentEvent;
use crate::rate_limit::RateLimiter;
use crate::registry::ExecutionRegistry;
use crate::run::AgentRun;
use crate::services::AgentServices;
use crate::supervisor::supervise;
use crate::tracker::track_execution;

/// Agent-specific logic plugged into the shared execution lifecycle.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn kind(&self) -> AgentKind;

    async fn execute_agent(&self, run: &AgentRun) -> Result<()>;

    /// Maps a platform event to a run. `None` means the event is ignored.
    async fn handle_event(
        &self,
        _event_name: &str,
        _payload: &Value,
    ) -> Result<Option<AgentContext>> {
        Ok(None)
    }
}

pub struct AgentRunner {
    agent: Arc<dyn Agent>,
    kind: AgentKind,
    limits: AgentLimits,
    services: Arc<AgentServices>,
    registry: Arc<ExecutionRegistry>,
    rate_limiter: RateLimiter,
}

impl AgentRunner {
    pub fn new(agent: Arc<dyn Agent>, limits: AgentLimits, services: Arc<AgentServices>) -> Self {
        let kind = agent.kind();
        let rate_limiter = RateLimiter::new(Arc::clone(&services.cache));
        Self {
            agent,
            kind,
            limits,
            services,
            registry: Arc::new(ExecutionRegistry::new()),
            rate_limiter,
        }
    }

    /// Uses the configured limits for the agent's kind.
    pub fn from_config(
        agent: Arc<dyn Agent>,
        agents: &AgentsConfig,
        services: Arc<AgentServices>,
    ) -> Self {
        let limits = agents.limits_for(&agent.kind());
        Self::new(agent, limits, services)
    }

    /// Shares one registry across runners, so execution ids are unique across agents.
    pub fn with_registry(mut self, registry: Arc<ExecutionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn kind(&self) -> &AgentKind {
        &self.kind
    }

    pub fn limits(&self) -> &AgentLimits {
        &self.limits
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Runs the agent once. Always returns a terminal result; never errors.
    pub async fn execute(&self, context: AgentContext) -> AgentResult {
        if !self.rate_limiter.admit(&self.kind, &self.limits).await {
            info!(
                event_name = "agent.execution.rate_limited",
                execution_id = %context.execution_id,
                agent_kind = %self.kind,
                "agent execution rate limited"
            );
            return AgentResult::rate_limited();
        }

        let state = match self.registry.begin(&context.execution_id) {
            Ok(state) => state,
            Err(refusal) => {
                warn!(
                    execution_id = %context.execution_id,
                    agent_kind = %self.kind,
                    error = %refusal,
                    "refusing duplicate execution"
                );
                return refused_result(refusal.to_string());
            }
        };

        let run = AgentRun::new(
            context.clone(),
            self.kind.clone(),
            self.limits.clone(),
            Arc::clone(&self.services),
            state.clone(),
        );

        self.services.events.emit(AgentEvent::ExecutionStarted {
            execution_id: context.execution_id.clone(),
            agent_kind: self.kind.clone(),
            trigger_type: context.trigger_type,
        });
        info!(
            event_name = "agent.execution.started",
            execution_id = %context.execution_id,
            agent_kind = %self.kind,
            trigger_type = context.trigger_type.as_str(),
            "agent execution started"
        );

        let deadline = Duration::from_millis(self.limits.max_execution_time_ms);
        let status = match supervise(Arc::clone(&self.agent), &run, deadline).await {
            Ok(()) => ExecutionStatus::Completed,
            Err(failure) => {
                let message = format!("{failure:#}");
                error!(
                    execution_id = %context.execution_id,
                    agent_kind = %self.kind,
                    error = %message,
                    "agent execution failed"
                );
                run.add_error(EXECUTION_ERROR, message, false);
                ExecutionStatus::Failed
            }
        };

        let result = run.build_result(status);
        self.registry.end(&context.execution_id, &state);

        track_execution(self.services.executions.as_ref(), &self.kind, &context, &result).await;

        self.services.events.emit(AgentEvent::ExecutionCompleted {
            execution_id: context.execution_id.clone(),
            agent_kind: self.kind.clone(),
            status: result.status,
            execution_time_ms: result.execution_time_ms,
        });
        info!(
            event_name = "agent.execution.completed",
            execution_id = %context.execution_id,
            agent_kind = %self.kind,
            status = result.status.as_str(),
            execution_time_ms = result.execution_time_ms,
            llm_calls = result.llm_calls_count,
            tokens_total = result.tokens_used.total,
            "agent execution completed"
        );

        result
    }

    /// Lets the agent decide whether `event_name` warrants a run, and runs it.
    pub async fn handle_event(&self, event_name: &str, payload: &Value) -> Option<AgentResult> {
        match self.agent.handle_event(event_name, payload).await {
            Ok(Some(context)) => Some(self.execute(context).await),
            Ok(None) => None,
            Err(failure) => {
                warn!(
                    trigger_event = event_name,
                    agent_kind = %self.kind,
                    error = ?failure,
                    "agent event handler failed"
                );
                None
            }
        }
    }
}

fn refused_result(message: String) -> AgentResult {
    AgentResult {
        success: false,
        status: ExecutionStatus::Failed,
        execution_time_ms: 0,
        llm_calls_count: 0,
        tokens_used: TokenUsage::default(),
        insights: Vec::new(),
        alerts: Vec::new(),
        actions: Vec::new(),
        errors: Some(vec![AgentErrorEntry {
            code: EXECUTION_ERROR.to_string(),
            message,
            recoverable: false,
            timestamp: Utc::now(),
        }]),
    }
}
