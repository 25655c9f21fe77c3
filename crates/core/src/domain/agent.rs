use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentKind(pub String);

impl AgentKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Event,
    Manual,
    Api,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Event => "event",
            Self::Manual => "manual",
            Self::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "event" => Some(Self::Event),
            "manual" => Some(Self::Manual),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

/// Caller-owned description of one agent run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub execution_id: ExecutionId,
    pub trigger_type: TriggerType,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AgentContext {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            execution_id: ExecutionId::generate(),
            trigger_type,
            entity_type: None,
            entity_id: None,
            user_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn for_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    RateLimited,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RATE_LIMITED" => Some(Self::RateLimited),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Canonical token accounting. `total` is always `input + output`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output, total: input.saturating_add(output) }
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.total = self.input.saturating_add(self.output);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentInsight {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Resolved => "RESOLVED",
            Self::Dismissed => "DISMISSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "ACKNOWLEDGED" => Some(Self::Acknowledged),
            "RESOLVED" => Some(Self::Resolved),
            "DISMISSED" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentAlert {
    pub id: String,
    pub agent_kind: AgentKind,
    pub alert_type: String,
    pub priority: AlertPriority,
    pub title: String,
    pub description: String,
    pub recommendation: Option<String>,
    pub user_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub status: AlertStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub suggested_actions: Option<Vec<Value>>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AgentAlert {
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self.status, next),
            (AlertStatus::Pending, AlertStatus::Acknowledged)
                | (AlertStatus::Pending, AlertStatus::Resolved)
                | (AlertStatus::Pending, AlertStatus::Dismissed)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Dismissed)
        )
    }

    pub fn transition_to(&mut self, next: AlertStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidAlertTransition { from: self.status, to: next })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Alert fields supplied by agent logic. Subject fields left empty fall back
/// to the run's context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub alert_type: String,
    pub priority: AlertPriority,
    pub title: String,
    pub description: String,
    pub recommendation: Option<String>,
    pub user_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub suggested_actions: Option<Vec<Value>>,
    pub metadata: Option<Value>,
}

impl NewAlert {
    pub fn new(
        alert_type: impl Into<String>,
        priority: AlertPriority,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            priority,
            title: title.into(),
            description: description.into(),
            recommendation: None,
            user_id: None,
            entity_type: None,
            entity_id: None,
            expires_at: None,
            suggested_actions: None,
            metadata: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    PendingApproval,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub config: Value,
    pub requires_approval: bool,
    pub status: ActionStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl AgentAction {
    pub fn initial_status(requires_approval: bool) -> ActionStatus {
        if requires_approval {
            ActionStatus::PendingApproval
        } else {
            ActionStatus::Approved
        }
    }

    pub fn approve(&mut self) -> Result<(), DomainError> {
        self.decide(ActionStatus::Approved)
    }

    pub fn reject(&mut self) -> Result<(), DomainError> {
        self.decide(ActionStatus::Rejected)
    }

    pub fn record_outcome(&mut self, outcome: Result<Value, String>) -> Result<(), DomainError> {
        if self.status != ActionStatus::Approved {
            return Err(DomainError::InvalidActionTransition {
                from: self.status,
                to: if outcome.is_ok() { ActionStatus::Executed } else { ActionStatus::Failed },
            });
        }

        self.executed_at = Some(Utc::now());
        match outcome {
            Ok(result) => {
                self.status = ActionStatus::Executed;
                self.result = Some(result);
            }
            Err(error) => {
                self.status = ActionStatus::Failed;
                self.error = Some(error);
            }
        }
        Ok(())
    }

    fn decide(&mut self, next: ActionStatus) -> Result<(), DomainError> {
        if self.status != ActionStatus::PendingApproval {
            return Err(DomainError::InvalidActionTransition { from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub action_type: String,
    pub config: Value,
    pub requires_approval: bool,
}

impl NewAction {
    pub fn new(action_type: impl Into<String>, config: Value, requires_approval: bool) -> Self {
        Self { action_type: action_type.into(), config, requires_approval }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentErrorEntry {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
    pub llm_calls_count: u32,
    pub tokens_used: TokenUsage,
    pub insights: Vec<AgentInsight>,
    pub alerts: Vec<AgentAlert>,
    pub actions: Vec<AgentAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<AgentErrorEntry>>,
}

impl AgentResult {
    /// Terminal result for a run refused by admission control.
    pub fn rate_limited() -> Self {
        Self {
            success: false,
            status: ExecutionStatus::RateLimited,
            execution_time_ms: 0,
            llm_calls_count: 0,
            tokens_used: TokenUsage::default(),
            insights: Vec::new(),
            alerts: Vec::new(),
            actions: Vec::new(),
            errors: Some(vec![AgentErrorEntry {
                code: RATE_LIMITED.to_string(),
                message: "Rate limit exceeded".to_string(),
                recoverable: true,
                timestamp: Utc::now(),
            }]),
        }
    }
}

/// Per-kind resource limits for agent runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLimits {
    pub max_execution_time_ms: u64,
    pub max_llm_calls: u32,
    pub max_tokens_per_execution: u64,
    pub max_alerts_per_execution: usize,
    pub max_actions_per_execution: usize,
    pub rate_limit_per_hour: u64,
    pub rate_limit_per_day: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 60_000,
            max_llm_calls: 10,
            max_tokens_per_execution: 50_000,
            max_alerts_per_execution: 10,
            max_actions_per_execution: 5,
            rate_limit_per_hour: 60,
            rate_limit_per_day: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::{
        ActionStatus, AgentAction, AgentAlert, AgentKind, AgentResult, AlertPriority, AlertStatus,
        ExecutionStatus, TokenUsage, TriggerType, RATE_LIMITED,
    };
    use crate::errors::DomainError;

    fn alert_fixture() -> AgentAlert {
        AgentAlert {
            id: "alert-1".to_string(),
            agent_kind: AgentKind::new("deal_health"),
            alert_type: "deal_at_risk".to_string(),
            priority: AlertPriority::High,
            title: "Deal stalled".to_string(),
            description: "No activity for 21 days".to_string(),
            recommendation: None,
            user_id: Some("rep-1".to_string()),
            entity_type: Some("deal".to_string()),
            entity_id: Some("D-1".to_string()),
            status: AlertStatus::Pending,
            expires_at: None,
            suggested_actions: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    fn action_fixture(requires_approval: bool) -> AgentAction {
        AgentAction {
            id: "action-1".to_string(),
            action_type: "send_email".to_string(),
            config: json!({"template": "follow_up"}),
            requires_approval,
            status: AgentAction::initial_status(requires_approval),
            executed_at: None,
            result: None,
            error: None,
        }
    }

    #[test]
    fn token_usage_total_tracks_input_and_output() {
        let mut usage = TokenUsage::new(120, 30);
        usage.accumulate(TokenUsage::new(80, 70));

        assert_eq!(usage, TokenUsage { input: 200, output: 100, total: 300 });
    }

    #[test]
    fn rate_limited_result_is_zeroed_with_single_recoverable_error() {
        let result = AgentResult::rate_limited();

        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::RateLimited);
        assert_eq!(result.tokens_used, TokenUsage::default());
        assert!(result.alerts.is_empty());
        assert!(result.actions.is_empty());
        let errors = result.errors.expect("rate limited result carries an error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, RATE_LIMITED);
        assert!(errors[0].recoverable);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in
            [ExecutionStatus::RateLimited, ExecutionStatus::Completed, ExecutionStatus::Failed]
        {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AlertStatus::parse("pending"), Some(AlertStatus::Pending));
        assert_eq!(TriggerType::parse(" Manual "), Some(TriggerType::Manual));
        assert_eq!(TriggerType::parse("cron"), None);
    }

    #[test]
    fn alert_lifecycle_rejects_reopening() {
        let mut alert = alert_fixture();
        alert.transition_to(AlertStatus::Acknowledged).expect("pending -> acknowledged");
        alert.transition_to(AlertStatus::Resolved).expect("acknowledged -> resolved");

        let error = alert.transition_to(AlertStatus::Pending).expect_err("resolved is terminal");
        assert_eq!(
            error,
            DomainError::InvalidAlertTransition {
                from: AlertStatus::Resolved,
                to: AlertStatus::Pending
            }
        );
    }

    #[test]
    fn alert_expiry_is_inclusive() {
        let now = Utc::now();
        let mut alert = alert_fixture();
        assert!(!alert.is_expired(now));

        alert.expires_at = Some(now);
        assert!(alert.is_expired(now));
        assert!(!alert.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn approval_gate_decides_initial_action_status() {
        assert_eq!(AgentAction::initial_status(true), ActionStatus::PendingApproval);
        assert_eq!(AgentAction::initial_status(false), ActionStatus::Approved);

        let mut gated = action_fixture(true);
        assert!(gated.record_outcome(Ok(json!({}))).is_err(), "unapproved actions cannot run");
        gated.approve().expect("pending approval -> approved");
        gated.record_outcome(Ok(json!({"sent": true}))).expect("approved -> executed");
        assert_eq!(gated.status, ActionStatus::Executed);
        assert!(gated.executed_at.is_some());

        let mut auto = action_fixture(false);
        assert!(auto.reject().is_err(), "auto-approved actions skip the approval gate");
        auto.record_outcome(Err("smtp unavailable".to_string())).expect("approved -> failed");
        assert_eq!(auto.status, ActionStatus::Failed);
        assert_eq!(auto.error.as_deref(), Some("smtp unavailable"));
    }

    #[test]
    fn action_type_serializes_as_type() {
        let json = serde_json::to_value(action_fixture(false)).expect("serialize action");
        assert_eq!(json["type"], "send_email");
        assert_eq!(json["status"], "APPROVED");
    }

    #[test]
    fn empty_errors_are_omitted_from_serialized_result() {
        let mut result = AgentResult::rate_limited();
        result.errors = None;

        let json = serde_json::to_value(&result).expect("serialize result");
        assert!(json.get("errors").is_none());
        assert_eq!(json["status"], "RATE_LIMITED");
    }
}
