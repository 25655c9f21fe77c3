use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use dealpilot_core::domain::agent::{AgentAlert, AgentKind, AlertPriority, AlertStatus};

use super::{parse_optional_timestamp, parse_timestamp, AgentAlertRepository, RepositoryError};
use crate::DbPool;

const ALERT_COLUMNS: &str = "id,
    agent_kind,
    alert_type,
    priority,
    title,
    description,
    recommendation,
    user_id,
    entity_type,
    entity_id,
    status,
    expires_at,
    suggested_actions_json,
    metadata_json,
    created_at";

pub struct SqlAgentAlertRepository {
    pool: DbPool,
}

impl SqlAgentAlertRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentAlertRepository for SqlAgentAlertRepository {
    async fn create(&self, alert: AgentAlert) -> Result<(), RepositoryError> {
        let suggested_actions_json = alert
            .suggested_actions
            .as_ref()
            .map(|actions| encode_json("suggested_actions", &Value::Array(actions.clone())))
            .transpose()?;
        let metadata_json =
            alert.metadata.as_ref().map(|metadata| encode_json("metadata", metadata)).transpose()?;

        sqlx::query(
            "INSERT INTO agent_alert (
                id,
                agent_kind,
                alert_type,
                priority,
                title,
                description,
                recommendation,
                user_id,
                entity_type,
                entity_id,
                status,
                expires_at,
                suggested_actions_json,
                metadata_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&alert.id)
        .bind(alert.agent_kind.as_str())
        .bind(&alert.alert_type)
        .bind(alert.priority.as_str())
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(alert.recommendation.as_deref())
        .bind(alert.user_id.as_deref())
        .bind(alert.entity_type.as_deref())
        .bind(alert.entity_id.as_deref())
        .bind(alert.status.as_str())
        .bind(alert.expires_at.map(|value| value.to_rfc3339()))
        .bind(suggested_actions_json)
        .bind(metadata_json)
        .bind(alert.created_at.to_rfc3339())
        .bind(alert.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AgentAlert>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM agent_alert WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(alert_from_row).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<AlertStatus>,
    ) -> Result<Vec<AgentAlert>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {ALERT_COLUMNS} FROM agent_alert
                 WHERE user_id = ? AND status = ?
                 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {ALERT_COLUMNS} FROM agent_alert
                 WHERE user_id = ?
                 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(alert_from_row).collect()
    }

    async fn update_status(
        &self,
        id: &str,
        status: AlertStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE agent_alert SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(updated_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn encode_json(column: &str, value: &Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

fn decode_json(column: &str, value: Option<String>) -> Result<Option<Value>, RepositoryError> {
    value
        .map(|raw| {
            serde_json::from_str::<Value>(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid json in `{column}`: {error}"))
            })
        })
        .transpose()
}

fn alert_from_row(row: SqliteRow) -> Result<AgentAlert, RepositoryError> {
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = AlertPriority::parse(&priority_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown alert priority `{priority_raw}`"))
    })?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = AlertStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown alert status `{status_raw}`")))?;

    let suggested_actions =
        match decode_json("suggested_actions_json", row.try_get("suggested_actions_json")?)? {
            Some(Value::Array(actions)) => Some(actions),
            Some(other) => {
                return Err(RepositoryError::Decode(format!(
                    "`suggested_actions_json` must hold an array, found `{other}`"
                )))
            }
            None => None,
        };

    Ok(AgentAlert {
        id: row.try_get("id")?,
        agent_kind: AgentKind(row.try_get("agent_kind")?),
        alert_type: row.try_get("alert_type")?,
        priority,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        recommendation: row.try_get("recommendation")?,
        user_id: row.try_get("user_id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        status,
        expires_at: parse_optional_timestamp("expires_at", row.try_get("expires_at")?)?,
        suggested_actions,
        metadata: decode_json("metadata_json", row.try_get("metadata_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use dealpilot_core::domain::agent::{AgentAlert, AgentKind, AlertPriority, AlertStatus};

    use super::SqlAgentAlertRepository;
    use crate::repositories::AgentAlertRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_alert(id: &str, user_id: &str) -> AgentAlert {
        AgentAlert {
            id: id.to_string(),
            agent_kind: AgentKind::new("deal_health"),
            alert_type: "deal_at_risk".to_string(),
            priority: AlertPriority::High,
            title: "Acme renewal stalled".to_string(),
            description: "No buyer activity in 21 days".to_string(),
            recommendation: Some("Schedule an executive check-in".to_string()),
            user_id: Some(user_id.to_string()),
            entity_type: Some("deal".to_string()),
            entity_id: Some("D-42".to_string()),
            status: AlertStatus::Pending,
            expires_at: Some(Utc::now() + Duration::days(7)),
            suggested_actions: Some(vec![json!({"type": "schedule_meeting"})]),
            metadata: Some(json!({"score": 31})),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sql_alert_repo_round_trip() {
        let repo = SqlAgentAlertRepository::new(setup_pool().await);
        let alert = sample_alert("alert-1", "rep-1");

        repo.create(alert.clone()).await.expect("create alert");
        let found = repo.find_by_id("alert-1").await.expect("find alert");

        assert_eq!(found, Some(alert));
    }

    #[tokio::test]
    async fn sql_alert_create_is_idempotent_by_id() {
        let repo = SqlAgentAlertRepository::new(setup_pool().await);
        let alert = sample_alert("alert-1", "rep-1");

        repo.create(alert.clone()).await.expect("first create");
        let mut duplicate = alert.clone();
        duplicate.title = "changed".to_string();
        repo.create(duplicate).await.expect("duplicate create is a no-op");

        let found = repo.find_by_id("alert-1").await.expect("find alert").expect("alert exists");
        assert_eq!(found.title, alert.title);
    }

    #[tokio::test]
    async fn sql_alert_status_filter_and_update() {
        let repo = SqlAgentAlertRepository::new(setup_pool().await);
        repo.create(sample_alert("alert-1", "rep-1")).await.expect("create 1");
        repo.create(sample_alert("alert-2", "rep-1")).await.expect("create 2");
        repo.create(sample_alert("alert-3", "rep-2")).await.expect("create 3");

        let updated = repo
            .update_status("alert-2", AlertStatus::Acknowledged, Utc::now())
            .await
            .expect("update status");
        assert!(updated);
        let missing = repo
            .update_status("alert-404", AlertStatus::Dismissed, Utc::now())
            .await
            .expect("update missing");
        assert!(!missing);

        let pending = repo
            .list_for_user("rep-1", Some(AlertStatus::Pending))
            .await
            .expect("list pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "alert-1");

        let all = repo.list_for_user("rep-1", None).await.expect("list all");
        assert_eq!(all.len(), 2);
    }
}
