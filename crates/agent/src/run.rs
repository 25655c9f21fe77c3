//! The handle an agent receives for one run.
//!
//! Everything an agent may do during a run goes through [`AgentRun`]: LLM
//! calls under the run's budget, the four result collectors, and the shared
//! read-through cache. Once the run ends the handle goes inert: collectors
//! become no-ops and the gateway reports "not in execution context".

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use dealpilot_core::domain::agent::{
    AgentAction, AgentAlert, AgentContext, AgentErrorEntry, AgentInsight, AgentKind, AgentLimits,
    AgentResult, AlertStatus, ExecutionStatus, NewAction, NewAlert,
};

use crate::connectors::{ConnectionStatus, CrmProvider, GuardedConnector};
use crate::error::AgentError;
use crate::events::AgentEvent;
use crate::llm::{ChatMessage, LlmCallOptions};
use crate::rate_limit::is_reserved_kind;
use crate::registry::SharedState;
use crate::services::AgentServices;

pub const ALERT_PERSIST_FAILED: &str = "ALERT_PERSIST_FAILED";

const JSON_INSTRUCTION: &str = "\n\nRespond with valid JSON only, no other text.";

#[derive(Clone)]
pub struct AgentRun {
    context: AgentContext,
    kind: AgentKind,
    limits: AgentLimits,
    services: Arc<AgentServices>,
    state: SharedState,
    cancellation: CancellationToken,
}

impl AgentRun {
    pub(crate) fn new(
        context: AgentContext,
        kind: AgentKind,
        limits: AgentLimits,
        services: Arc<AgentServices>,
        state: SharedState,
    ) -> Self {
        Self { context, kind, limits, services, state, cancellation: CancellationToken::new() }
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn agent_kind(&self) -> &AgentKind {
        &self.kind
    }

    pub fn limits(&self) -> &AgentLimits {
        &self.limits
    }

    /// Fires when the run hits its deadline.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_closed()
    }

    /// CRM connection state for the user this run acts for.
    pub async fn crm_status(&self, provider: CrmProvider) -> ConnectionStatus {
        match self.crm_target(provider) {
            Ok((connector, user_id)) => connector.status(user_id).await,
            Err(reason) => ConnectionStatus::disconnected(provider, reason),
        }
    }

    pub async fn crm_query(&self, provider: CrmProvider, query: &str) -> Option<Vec<Value>> {
        let (connector, user_id) = self.crm_target(provider).ok()?;
        connector.query(user_id, query).await
    }

    pub async fn crm_describe(&self, provider: CrmProvider, object_name: &str) -> Option<Value> {
        let (connector, user_id) = self.crm_target(provider).ok()?;
        connector.describe_object(user_id, object_name).await
    }

    fn crm_target(
        &self,
        provider: CrmProvider,
    ) -> Result<(&GuardedConnector, &str), &'static str> {
        let connector =
            self.services.connectors.get(provider).ok_or("connector not configured")?;
        let user_id =
            self.context.user_id.as_deref().ok_or("no user in execution context")?;
        Ok((connector, user_id))
    }

    pub async fn call_llm(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: LlmCallOptions,
    ) -> Result<String, AgentError> {
        let max_llm_calls = self.limits.max_llm_calls;
        let max_tokens = self.limits.max_tokens_per_execution;
        self.state
            .with_open(|state| {
                if state.llm_calls_count >= max_llm_calls {
                    return Err(AgentError::LlmCallLimit(max_llm_calls));
                }
                if state.tokens_used.total >= max_tokens {
                    return Err(AgentError::TokenLimit(max_tokens));
                }
                state.llm_calls_count += 1;
                Ok(())
            })
            .ok_or(AgentError::NotInExecution)??;

        let messages = [ChatMessage::user(prompt)];
        let completion = tokio::select! {
            _ = self.cancellation.cancelled() => {
                return Err(AgentError::Cancelled(self.context.execution_id.clone()));
            }
            completion = self.services.llm.generate_chat(&messages, system_prompt, &options) => {
                completion.map_err(AgentError::Llm)?
            }
        };

        if let Some(usage) = completion.usage {
            self.state.with_open(|state| state.tokens_used.accumulate(usage));
        }
        debug!(
            execution_id = %self.context.execution_id,
            agent_kind = %self.kind,
            tokens = completion.usage.map(|usage| usage.total),
            "llm call completed"
        );

        Ok(completion.text)
    }

    /// Asks for a JSON reply and parses the outermost object in it.
    pub async fn call_llm_for_json<T>(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<T, AgentError>
    where
        T: DeserializeOwned,
    {
        let prompt = format!("{prompt}{JSON_INSTRUCTION}");
        let text = self.call_llm(&prompt, system_prompt, LlmCallOptions::default()).await?;
        let object = extract_json_object(&text).ok_or(AgentError::JsonNotFound)?;
        Ok(serde_json::from_str(object)?)
    }

    pub fn add_insight(&self, payload: Value) {
        let insight =
            AgentInsight { id: Uuid::new_v4().to_string(), created_at: Utc::now(), payload };
        self.state.with_open(|state| state.insights.push(insight));
    }

    /// Persists, records and announces an alert.
    ///
    /// The cap slot is taken up front, but the alert only enters the run
    /// result once the write has settled. A write cut off by the deadline
    /// therefore leaves no unsaved alert behind. A storage failure keeps the
    /// alert in the result and records a recoverable error instead.
    ///
    /// Returns `None` when the alert cap is reached or the run has ended.
    pub async fn create_alert(&self, data: NewAlert) -> Option<AgentAlert> {
        let cap = self.limits.max_alerts_per_execution;
        let alert = self.new_alert(data);
        let reserved = self.state.with_open(|state| {
            if state.alert_slots >= cap {
                return false;
            }
            state.alert_slots += 1;
            true
        })?;
        if !reserved {
            warn!(
                execution_id = %self.context.execution_id,
                agent_kind = %self.kind,
                cap,
                alert_type = %alert.alert_type,
                "alert cap reached, dropping alert"
            );
            return None;
        }

        let persisted = self.services.alerts.create(alert.clone()).await;
        let recorded = self.state.with_open(|state| state.alerts.push(alert.clone())).is_some();

        match persisted {
            Ok(()) => {
                self.services.events.emit(AgentEvent::AlertCreated { alert: alert.clone() });
                Some(alert)
            }
            Err(error) => {
                warn!(
                    execution_id = %self.context.execution_id,
                    alert_id = %alert.id,
                    error = %error,
                    "alert persistence failed"
                );
                self.add_error(
                    ALERT_PERSIST_FAILED,
                    format!("alert {} was not persisted: {error}", alert.id),
                    true,
                );
                recorded.then_some(alert)
            }
        }
    }

    pub fn queue_action(&self, data: NewAction) -> Option<AgentAction> {
        let cap = self.limits.max_actions_per_execution;
        let action = AgentAction {
            id: Uuid::new_v4().to_string(),
            action_type: data.action_type,
            config: data.config,
            requires_approval: data.requires_approval,
            status: AgentAction::initial_status(data.requires_approval),
            executed_at: None,
            result: None,
            error: None,
        };
        let accepted = self.state.with_open(|state| {
            if state.actions.len() >= cap {
                return false;
            }
            state.actions.push(action.clone());
            true
        })?;
        if !accepted {
            warn!(
                execution_id = %self.context.execution_id,
                agent_kind = %self.kind,
                cap,
                action_type = %action.action_type,
                "action cap reached, dropping action"
            );
            return None;
        }
        Some(action)
    }

    pub fn add_error(&self, code: &str, message: impl Into<String>, recoverable: bool) {
        let entry = AgentErrorEntry {
            code: code.to_string(),
            message: message.into(),
            recoverable,
            timestamp: Utc::now(),
        };
        self.state.with_open(|state| state.errors.push(entry));
    }

    pub async fn get_cached<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let cache_key = self.cache_key(key)?;
        match self.services.cache.get(&cache_key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(error) => {
                    debug!(cache_key = %cache_key, error = %error, "unexpected cached shape");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(cache_key = %cache_key, error = %error, "cache read failed");
                None
            }
        }
    }

    /// Stores `value` under the agent's namespace. `ttl` defaults to the configured TTL.
    pub async fn set_cached<T>(&self, key: &str, value: &T, ttl: Option<Duration>)
    where
        T: Serialize,
    {
        let Some(cache_key) = self.cache_key(key) else {
            return;
        };
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(cache_key = %cache_key, error = %error, "value not cacheable");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.services.cache_ttl);
        if let Err(error) = self.services.cache.set(&cache_key, encoded, ttl).await {
            warn!(cache_key = %cache_key, error = %error, "cache write failed");
        }
    }

    pub async fn cached<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(hit) = self.get_cached(key).await {
            return Ok(hit);
        }
        let value = loader().await?;
        self.set_cached(key, &value, ttl).await;
        Ok(value)
    }

    pub(crate) fn build_result(&self, status: ExecutionStatus) -> AgentResult {
        self.state.inspect(|state| AgentResult {
            success: status == ExecutionStatus::Completed,
            status,
            execution_time_ms: u64::try_from(state.started.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            llm_calls_count: state.llm_calls_count,
            tokens_used: state.tokens_used,
            insights: state.insights.clone(),
            alerts: state.alerts.clone(),
            actions: state.actions.clone(),
            errors: (!state.errors.is_empty()).then(|| state.errors.clone()),
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SharedState {
        &self.state
    }

    fn cache_key(&self, key: &str) -> Option<String> {
        if is_reserved_kind(&self.kind) {
            warn!(
                agent_kind = %self.kind,
                "agent kind collides with rate limit keys, cache disabled"
            );
            return None;
        }
        Some(format!("agent:{}:{key}", self.kind))
    }

    fn new_alert(&self, data: NewAlert) -> AgentAlert {
        AgentAlert {
            id: Uuid::new_v4().to_string(),
            agent_kind: self.kind.clone(),
            alert_type: data.alert_type,
            priority: data.priority,
            title: data.title,
            description: data.description,
            recommendation: data.recommendation,
            user_id: data.user_id.or_else(|| self.context.user_id.clone()),
            entity_type: data.entity_type.or_else(|| self.context.entity_type.clone()),
            entity_id: data.entity_id.or_else(|| self.context.entity_id.clone()),
            status: AlertStatus::Pending,
            expires_at: data.expires_at,
            suggested_actions: data.suggested_actions,
            metadata: data.metadata,
            created_at: Utc::now(),
        }
    }
}

/// Span from the first `{` to the last `}`, if both exist in that order.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};

    use dealpilot_core::domain::agent::{
        AgentContext, AgentKind, AgentLimits, AlertPriority, ExecutionStatus, NewAlert,
        TokenUsage, TriggerType,
    };
    use dealpilot_db::CounterCache;

    use super::{extract_json_object, AgentRun};
    use crate::connectors::{ConnectionStatus, CrmConnector, CrmProvider};
    use crate::error::AgentError;
    use crate::llm::{ChatCompletion, ChatMessage, LlmCallOptions, LlmClient};
    use crate::registry::ExecutionRegistry;
    use crate::services::AgentServices;

    struct FixedReply(&'static str);

    #[async_trait]
    impl LlmClient for FixedReply {
        async fn generate_chat(
            &self,
            _messages: &[ChatMessage],
            _system_prompt: Option<&str>,
            _options: &LlmCallOptions,
        ) -> Result<ChatCompletion> {
            Ok(ChatCompletion::new(self.0, Some(TokenUsage::new(10, 5))))
        }
    }

    fn run_with(reply: &'static str, limits: AgentLimits) -> (ExecutionRegistry, AgentRun) {
        run_as("deal_health", reply, limits)
    }

    fn run_as(
        kind: &str,
        reply: &'static str,
        limits: AgentLimits,
    ) -> (ExecutionRegistry, AgentRun) {
        let registry = ExecutionRegistry::new();
        let context = AgentContext::new(TriggerType::Manual).for_user("rep-7");
        let state = registry.begin(&context.execution_id).expect("begin");
        let services = Arc::new(AgentServices::in_memory(Arc::new(FixedReply(reply))));
        let run = AgentRun::new(context, AgentKind::new(kind), limits, services, state);
        (registry, run)
    }

    #[test]
    fn json_span_runs_from_first_open_to_last_close_brace() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": {\"b\": 1}} hope that helps"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        score: u32,
    }

    #[tokio::test]
    async fn call_llm_for_json_parses_wrapped_object() {
        let (_registry, run) = run_with("Here you go: {\"score\": 72}", AgentLimits::default());

        let parsed: Score = run.call_llm_for_json("Score deal D-42", None).await.expect("json");
        assert_eq!(parsed, Score { score: 72 });
    }

    #[tokio::test]
    async fn call_llm_for_json_reports_missing_and_malformed_json() {
        let (_registry, run) = run_with("I cannot answer that", AgentLimits::default());
        let error = run.call_llm_for_json::<Score>("Score", None).await.expect_err("no json");
        assert_eq!(error.to_string(), "Failed to parse LLM response as JSON");

        let (_registry, run) = run_with("{score: seventy}", AgentLimits::default());
        let error = run.call_llm_for_json::<Score>("Score", None).await.expect_err("malformed");
        assert!(matches!(error, AgentError::JsonParse(_)));
    }

    #[tokio::test]
    async fn token_budget_blocks_further_calls() {
        let limits = AgentLimits { max_tokens_per_execution: 20, ..AgentLimits::default() };
        let (_registry, run) = run_with("ok", limits);

        run.call_llm("first", None, LlmCallOptions::default()).await.expect("first");
        run.call_llm("second", None, LlmCallOptions::default()).await.expect("second");
        let error = run.call_llm("third", None, LlmCallOptions::default()).await.expect_err("cap");

        assert_eq!(error.to_string(), "LLM token limit exceeded: 20");
        assert_eq!(run.build_result(ExecutionStatus::Failed).llm_calls_count, 2);
    }

    #[tokio::test]
    async fn alerts_inherit_context_user_and_pending_status() {
        let (_registry, run) = run_with("ok", AgentLimits::default());

        let alert = run
            .create_alert(NewAlert::new("deal_at_risk", AlertPriority::High, "Stalled", "No reply"))
            .await
            .expect("alert accepted");

        assert_eq!(alert.user_id.as_deref(), Some("rep-7"));
        assert_eq!(alert.agent_kind, AgentKind::new("deal_health"));
        assert_eq!(run.build_result(ExecutionStatus::Completed).alerts, vec![alert]);
    }

    #[tokio::test]
    async fn ended_run_is_inert() {
        let (registry, run) = run_with("ok", AgentLimits::default());
        registry.end(&run.context().execution_id, run.state());

        run.add_insight(json!({"late": true}));
        run.add_error("LATE", "after end", true);
        let alert = run
            .create_alert(NewAlert::new("late", AlertPriority::Low, "Late", "Late alert"))
            .await;
        let error =
            run.call_llm("hello", None, LlmCallOptions::default()).await.expect_err("closed");

        assert!(alert.is_none());
        assert_eq!(error.to_string(), "not in execution context");
        let result = run.build_result(ExecutionStatus::Completed);
        assert!(result.insights.is_empty());
        assert_eq!(result.errors, None);
    }

    #[tokio::test]
    async fn cached_loads_once_then_hits() {
        let (_registry, run) = run_with("ok", AgentLimits::default());
        let mut loads = 0;

        let first: u32 = run
            .cached("pipeline:Q3", Some(Duration::from_secs(60)), || {
                loads += 1;
                async { Ok(42) }
            })
            .await
            .expect("first load");
        let second: u32 = run
            .cached("pipeline:Q3", None, || async { Err(anyhow::anyhow!("loader must not run")) })
            .await
            .expect("cache hit");

        assert_eq!((first, second, loads), (42, 42, 1));
    }

    #[tokio::test]
    async fn counter_namespace_kind_cannot_reach_rate_limit_keys() {
        let (_registry, run) = run_as("ratelimit", "ok", AgentLimits::default());

        run.set_cached("deal_health:hour", &999u64, None).await;

        let counter = run.services.cache.get("agent:ratelimit:deal_health:hour").await;
        assert_eq!(counter.expect("cache read"), None);
        assert_eq!(run.get_cached::<u64>("deal_health:hour").await, None);
    }

    struct EchoCrm;

    #[async_trait]
    impl CrmConnector for EchoCrm {
        fn provider(&self) -> CrmProvider {
            CrmProvider::Salesforce
        }

        async fn get_connection_status(&self, user_id: &str) -> Result<ConnectionStatus> {
            Ok(ConnectionStatus {
                provider: CrmProvider::Salesforce,
                connected: true,
                instance_url: Some(format!("https://{user_id}.my.salesforce.com")),
                error: None,
            })
        }

        async fn query(&self, user_id: &str, query: &str) -> Result<Vec<Value>> {
            Ok(vec![json!({"user": user_id, "query": query})])
        }

        async fn describe_object(&self, user_id: &str, object_name: &str) -> Result<Value> {
            Ok(json!({"user": user_id, "name": object_name}))
        }
    }

    fn crm_run(context: AgentContext) -> (ExecutionRegistry, AgentRun) {
        let registry = ExecutionRegistry::new();
        let state = registry.begin(&context.execution_id).expect("begin");
        let services = AgentServices::in_memory(Arc::new(FixedReply("ok")))
            .with_connector(Arc::new(EchoCrm));
        let kind = AgentKind::new("deal_health");
        let run = AgentRun::new(context, kind, AgentLimits::default(), Arc::new(services), state);
        (registry, run)
    }

    #[tokio::test]
    async fn crm_calls_act_for_the_context_user() {
        let (_registry, run) = crm_run(AgentContext::new(TriggerType::Manual).for_user("rep-7"));

        let status = run.crm_status(CrmProvider::Salesforce).await;
        assert_eq!(status.instance_url.as_deref(), Some("https://rep-7.my.salesforce.com"));
        let rows = run.crm_query(CrmProvider::Salesforce, "SELECT Id FROM Opportunity").await;
        assert_eq!(rows.expect("rows")[0]["user"], "rep-7");
        let described = run.crm_describe(CrmProvider::Salesforce, "Opportunity").await;
        assert_eq!(described.expect("description")["user"], "rep-7");
    }

    #[tokio::test]
    async fn crm_calls_without_a_user_or_connector_degrade() {
        let (_registry, run) = crm_run(AgentContext::new(TriggerType::Scheduled));

        let status = run.crm_status(CrmProvider::Salesforce).await;
        assert!(!status.connected);
        assert_eq!(status.error.as_deref(), Some("no user in execution context"));
        assert_eq!(run.crm_query(CrmProvider::Salesforce, "SELECT Id FROM Account").await, None);
        assert_eq!(run.crm_describe(CrmProvider::Salesforce, "Account").await, None);

        let missing = run.crm_status(CrmProvider::OracleCx).await;
        assert_eq!(missing.error.as_deref(), Some("connector not configured"));
    }
}
