use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use dealpilot_core::domain::agent::{AgentAlert, AgentKind, AlertStatus, ExecutionId};
use dealpilot_core::domain::execution::AgentExecutionRecord;

use super::{AgentAlertRepository, AgentExecutionRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryAgentAlertRepository {
    alerts: RwLock<HashMap<String, AgentAlert>>,
}

impl InMemoryAgentAlertRepository {
    pub async fn len(&self) -> usize {
        self.alerts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.alerts.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AgentAlertRepository for InMemoryAgentAlertRepository {
    async fn create(&self, alert: AgentAlert) -> Result<(), RepositoryError> {
        let mut alerts = self.alerts.write().await;
        alerts.entry(alert.id.clone()).or_insert(alert);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AgentAlert>, RepositoryError> {
        let alerts = self.alerts.read().await;
        Ok(alerts.get(id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<AlertStatus>,
    ) -> Result<Vec<AgentAlert>, RepositoryError> {
        let alerts = self.alerts.read().await;
        let mut matching: Vec<_> = alerts
            .values()
            .filter(|alert| alert.user_id.as_deref() == Some(user_id))
            .filter(|alert| status.map_or(true, |status| alert.status == status))
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(matching)
    }

    async fn update_status(
        &self,
        id: &str,
        status: AlertStatus,
        _updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut alerts = self.alerts.write().await;
        Ok(alerts.get_mut(id).map(|alert| alert.status = status).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryAgentExecutionRepository {
    records: RwLock<Vec<AgentExecutionRecord>>,
}

impl InMemoryAgentExecutionRepository {
    pub async fn records(&self) -> Vec<AgentExecutionRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AgentExecutionRepository for InMemoryAgentExecutionRepository {
    async fn create(&self, record: AgentExecutionRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if !records.iter().any(|existing| existing.id == record.id) {
            records.push(record);
        }
        Ok(())
    }

    async fn find_by_execution_id(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<AgentExecutionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| &record.execution_id == execution_id).cloned().collect())
    }

    async fn list_for_agent(
        &self,
        agent_kind: &AgentKind,
        limit: u32,
    ) -> Result<Vec<AgentExecutionRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<_> =
            records.iter().filter(|record| &record.agent_kind == agent_kind).cloned().collect();
        matching.sort_by(|left, right| right.completed_at.cmp(&left.completed_at));
        matching.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use dealpilot_core::domain::agent::{AgentAlert, AgentKind, AlertPriority, AlertStatus};

    use crate::repositories::{AgentAlertRepository, InMemoryAgentAlertRepository};

    fn alert(id: &str, user_id: &str) -> AgentAlert {
        AgentAlert {
            id: id.to_string(),
            agent_kind: AgentKind::new("pipeline"),
            alert_type: "coverage_gap".to_string(),
            priority: AlertPriority::Medium,
            title: "Pipeline coverage below 3x".to_string(),
            description: "Q3 coverage is 2.1x".to_string(),
            recommendation: None,
            user_id: Some(user_id.to_string()),
            entity_type: None,
            entity_id: None,
            status: AlertStatus::Pending,
            expires_at: None,
            suggested_actions: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_alert_repo_round_trip() {
        let repo = InMemoryAgentAlertRepository::default();
        let stored = alert("A-1", "rep-1");

        repo.create(stored.clone()).await.expect("create alert");
        let found = repo.find_by_id("A-1").await.expect("find alert");

        assert_eq!(found, Some(stored));
    }

    #[tokio::test]
    async fn in_memory_alert_repo_filters_by_user_and_status() {
        let repo = InMemoryAgentAlertRepository::default();
        repo.create(alert("A-1", "rep-1")).await.expect("create");
        repo.create(alert("A-2", "rep-1")).await.expect("create");
        repo.create(alert("A-3", "rep-2")).await.expect("create");
        assert!(repo
            .update_status("A-1", AlertStatus::Dismissed, Utc::now())
            .await
            .expect("update"));

        let pending =
            repo.list_for_user("rep-1", Some(AlertStatus::Pending)).await.expect("list pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "A-2");
        assert_eq!(repo.len().await, 3);
    }
}
