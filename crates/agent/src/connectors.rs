//! Optional third-party CRM access for agents.
//!
//! Agents treat every connector failure as "data unavailable": the guarded
//! wrapper logs the failure and hands back a disconnected status or `None`.
//! Connections are per user, so every call names the user it acts for.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmProvider {
    Salesforce,
    OracleCx,
}

impl CrmProvider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "salesforce" => Some(Self::Salesforce),
            "oracle_cx" | "oracle" => Some(Self::OracleCx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Salesforce => "salesforce",
            Self::OracleCx => "oracle_cx",
        }
    }
}

impl fmt::Display for CrmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub provider: CrmProvider,
    pub connected: bool,
    pub instance_url: Option<String>,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected(provider: CrmProvider, error: impl Into<String>) -> Self {
        Self { provider, connected: false, instance_url: None, error: Some(error.into()) }
    }
}

#[async_trait]
pub trait CrmConnector: Send + Sync {
    fn provider(&self) -> CrmProvider;

    async fn get_connection_status(&self, user_id: &str) -> Result<ConnectionStatus>;

    async fn query(&self, user_id: &str, query: &str) -> Result<Vec<Value>>;

    async fn describe_object(&self, user_id: &str, object_name: &str) -> Result<Value>;
}

#[derive(Clone)]
pub struct GuardedConnector {
    inner: Arc<dyn CrmConnector>,
}

impl GuardedConnector {
    pub fn new(inner: Arc<dyn CrmConnector>) -> Self {
        Self { inner }
    }

    pub fn provider(&self) -> CrmProvider {
        self.inner.provider()
    }

    pub async fn status(&self, user_id: &str) -> ConnectionStatus {
        let provider = self.provider();
        match self.inner.get_connection_status(user_id).await {
            Ok(status) => status,
            Err(error) => {
                warn!(
                    provider = %provider,
                    user_id,
                    error = %error,
                    "crm connection status unavailable"
                );
                ConnectionStatus::disconnected(provider, error.to_string())
            }
        }
    }

    pub async fn query(&self, user_id: &str, query: &str) -> Option<Vec<Value>> {
        match self.inner.query(user_id, query).await {
            Ok(rows) => Some(rows),
            Err(error) => {
                warn!(provider = %self.provider(), user_id, error = %error, "crm query failed");
                None
            }
        }
    }

    pub async fn describe_object(&self, user_id: &str, object_name: &str) -> Option<Value> {
        match self.inner.describe_object(user_id, object_name).await {
            Ok(description) => Some(description),
            Err(error) => {
                warn!(
                    provider = %self.provider(),
                    user_id,
                    object_name,
                    error = %error,
                    "crm describe failed"
                );
                None
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<CrmProvider, GuardedConnector>,
}

impl ConnectorSet {
    pub fn register(&mut self, connector: Arc<dyn CrmConnector>) {
        let connector = GuardedConnector::new(connector);
        self.connectors.insert(connector.provider(), connector);
    }

    pub fn get(&self, provider: CrmProvider) -> Option<&GuardedConnector> {
        self.connectors.get(&provider)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
