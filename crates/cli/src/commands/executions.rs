use dealpilot_core::domain::agent::AgentKind;
use dealpilot_db::{AgentExecutionRepository, SqlAgentExecutionRepository};

use crate::commands::{block_on, load_config, open_migrated_pool, CommandFailure, CommandResult};

/// Lists the most recent execution records of one agent kind.
pub fn run(agent: &str, limit: u32) -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return failure.into_result("executions"),
    };
    let kind = AgentKind::new(agent.trim());
    if kind.as_str().is_empty() {
        return CommandResult::failure(
            "executions",
            "invalid_argument",
            "--agent must not be empty",
            7,
        );
    }

    let result = block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let records = SqlAgentExecutionRepository::new(pool.clone())
            .list_for_agent(&kind, limit)
            .await
            .map_err(|error| CommandFailure::new("repository", error.to_string(), 6));
        pool.close().await;
        records
    });

    let records = match result {
        Ok(records) => records,
        Err(failure) => return failure.into_result("executions"),
    };
    let message = format!("{} execution(s) for agent `{kind}`", records.len());
    match serde_json::to_value(&records) {
        Ok(data) => CommandResult::success_with_data("executions", message, data),
        Err(error) => CommandResult::failure("executions", "serialization", error.to_string(), 8),
    }
}
