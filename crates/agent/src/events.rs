use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use dealpilot_core::domain::agent::{
    AgentAlert, AgentKind, ExecutionId, ExecutionStatus, TriggerType,
};

pub const EXECUTION_STARTED: &str = "agent.execution.started";
pub const EXECUTION_COMPLETED: &str = "agent.execution.completed";
pub const ALERT_CREATED: &str = "agent.alert.created";

#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        agent_kind: AgentKind,
        trigger_type: TriggerType,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        agent_kind: AgentKind,
        status: ExecutionStatus,
        execution_time_ms: u64,
    },
    AlertCreated {
        alert: AgentAlert,
    },
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => EXECUTION_STARTED,
            Self::ExecutionCompleted { .. } => EXECUTION_COMPLETED,
            Self::AlertCreated { .. } => ALERT_CREATED,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::ExecutionStarted { execution_id, agent_kind, trigger_type } => json!({
                "execution_id": execution_id,
                "agent_kind": agent_kind,
                "trigger_type": trigger_type.as_str(),
            }),
            Self::ExecutionCompleted { execution_id, agent_kind, status, execution_time_ms } => {
                json!({
                    "execution_id": execution_id,
                    "agent_kind": agent_kind,
                    "status": status.as_str(),
                    "execution_time_ms": execution_time_ms,
                })
            }
            Self::AlertCreated { alert } => json!({
                "alert_id": alert.id,
                "agent_kind": alert.agent_kind,
                "alert_type": alert.alert_type,
                "priority": alert.priority.as_str(),
                "user_id": alert.user_id,
            }),
        }
    }
}

/// Fire-and-forget notification sink. Emission never fails the caller.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

pub struct BroadcastEventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastEventBus {
    fn emit(&self, event: AgentEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            debug!(event_name = name, "no event subscribers");
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl InMemoryEventBus {
    pub fn events(&self) -> Vec<AgentEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(AgentEvent::name).collect()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, event: AgentEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
