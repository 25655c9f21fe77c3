pub mod cache;
pub mod connection;
pub mod migrations;
pub mod repositories;

pub use cache::{CacheError, CounterCache, InMemoryCounterCache, SqlCounterCache};
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    AgentAlertRepository, AgentExecutionRepository, InMemoryAgentAlertRepository,
    InMemoryAgentExecutionRepository, RepositoryError, SqlAgentAlertRepository,
    SqlAgentExecutionRepository,
};
