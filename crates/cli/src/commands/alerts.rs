use dealpilot_core::domain::agent::AlertStatus;
use dealpilot_db::{AgentAlertRepository, SqlAgentAlertRepository};

use crate::commands::{block_on, load_config, open_migrated_pool, CommandFailure, CommandResult};

/// Lists a user's alerts, newest first, optionally filtered by status.
pub fn run(user: &str, status: Option<&str>) -> CommandResult {
    let status = match status.map(parse_status).transpose() {
        Ok(status) => status,
        Err(message) => return CommandResult::failure("alerts", "invalid_argument", message, 7),
    };
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return failure.into_result("alerts"),
    };

    let result = block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let alerts = SqlAgentAlertRepository::new(pool.clone())
            .list_for_user(user, status)
            .await
            .map_err(|error| CommandFailure::new("repository", error.to_string(), 6));
        pool.close().await;
        alerts
    });

    let alerts = match result {
        Ok(alerts) => alerts,
        Err(failure) => return failure.into_result("alerts"),
    };
    let message = format!("{} alert(s) for user `{user}`", alerts.len());
    match serde_json::to_value(&alerts) {
        Ok(data) => CommandResult::success_with_data("alerts", message, data),
        Err(error) => CommandResult::failure("alerts", "serialization", error.to_string(), 8),
    }
}

fn parse_status(raw: &str) -> Result<AlertStatus, String> {
    AlertStatus::parse(&raw.trim().to_ascii_uppercase()).ok_or_else(|| {
        format!("unknown alert status `{raw}` (expected pending|acknowledged|resolved|dismissed)")
    })
}
