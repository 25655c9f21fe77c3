use std::sync::Arc;
use std::time::Duration;

use dealpilot_core::config::{AppConfig, CacheBackend};
use dealpilot_db::{
    AgentAlertRepository, AgentExecutionRepository, CounterCache, DbPool,
    InMemoryAgentAlertRepository, InMemoryAgentExecutionRepository, InMemoryCounterCache,
    SqlAgentAlertRepository, SqlAgentExecutionRepository, SqlCounterCache,
};

use crate::connectors::{ConnectorSet, CrmConnector};
use crate::error::AgentError;
use crate::events::{BroadcastEventBus, EventBus, InMemoryEventBus};
use crate::llm::{HttpLlmClient, LlmClient};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3_600);

/// Collaborators shared by every run of every agent.
#[derive(Clone)]
pub struct AgentServices {
    pub llm: Arc<dyn LlmClient>,
    pub cache: Arc<dyn CounterCache>,
    pub alerts: Arc<dyn AgentAlertRepository>,
    pub executions: Arc<dyn AgentExecutionRepository>,
    pub events: Arc<dyn EventBus>,
    pub connectors: ConnectorSet,
    pub cache_ttl: Duration,
}

impl AgentServices {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn CounterCache>,
        alerts: Arc<dyn AgentAlertRepository>,
        executions: Arc<dyn AgentExecutionRepository>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            llm,
            cache,
            alerts,
            executions,
            events,
            connectors: ConnectorSet::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Everything but the LLM kept in process memory.
    pub fn in_memory(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(
            llm,
            Arc::new(InMemoryCounterCache::default()),
            Arc::new(InMemoryAgentAlertRepository::default()),
            Arc::new(InMemoryAgentExecutionRepository::default()),
            Arc::new(InMemoryEventBus::default()),
        )
    }

    pub fn from_config(config: &AppConfig, pool: DbPool) -> Result<Self, AgentError> {
        let llm = Arc::new(HttpLlmClient::from_config(&config.llm)?);
        let cache: Arc<dyn CounterCache> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(InMemoryCounterCache::default()),
            CacheBackend::Sqlite => Arc::new(SqlCounterCache::new(pool.clone())),
        };

        Ok(Self::new(
            llm,
            cache,
            Arc::new(SqlAgentAlertRepository::new(pool.clone())),
            Arc::new(SqlAgentExecutionRepository::new(pool)),
            Arc::new(BroadcastEventBus::default()),
        )
        .with_cache_ttl(Duration::from_secs(config.cache.default_ttl_secs)))
    }

    pub fn with_connector(mut self, connector: Arc<dyn CrmConnector>) -> Self {
        self.connectors.register(connector);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }
}
