use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dealpilot_core::config::{AppConfig, LoadOptions};
use dealpilot_core::domain::agent::AgentKind;
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let defaults = &config.agents.defaults;
    let llm_api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let fields: Vec<(&str, String, Option<&str>)> = vec![
        ("database.url", config.database.url.clone(), Some("DEALPILOT_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("DEALPILOT_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("DEALPILOT_DATABASE_TIMEOUT_SECS"),
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), Some("DEALPILOT_LLM_PROVIDER")),
        ("llm.model", config.llm.model.clone(), Some("DEALPILOT_LLM_MODEL")),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("DEALPILOT_LLM_BASE_URL"),
        ),
        ("llm.api_key", llm_api_key, Some("DEALPILOT_LLM_API_KEY")),
        (
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            Some("DEALPILOT_LLM_TIMEOUT_SECS"),
        ),
        ("llm.max_retries", config.llm.max_retries.to_string(), Some("DEALPILOT_LLM_MAX_RETRIES")),
        ("cache.backend", format!("{:?}", config.cache.backend), Some("DEALPILOT_CACHE_BACKEND")),
        (
            "cache.default_ttl_secs",
            config.cache.default_ttl_secs.to_string(),
            Some("DEALPILOT_CACHE_DEFAULT_TTL_SECS"),
        ),
        (
            "agents.defaults.max_execution_time_ms",
            defaults.max_execution_time_ms.to_string(),
            Some("DEALPILOT_AGENT_MAX_EXECUTION_TIME_MS"),
        ),
        (
            "agents.defaults.max_llm_calls",
            defaults.max_llm_calls.to_string(),
            Some("DEALPILOT_AGENT_MAX_LLM_CALLS"),
        ),
        (
            "agents.defaults.max_tokens_per_execution",
            defaults.max_tokens_per_execution.to_string(),
            None,
        ),
        (
            "agents.defaults.max_alerts_per_execution",
            defaults.max_alerts_per_execution.to_string(),
            None,
        ),
        (
            "agents.defaults.max_actions_per_execution",
            defaults.max_actions_per_execution.to_string(),
            None,
        ),
        (
            "agents.defaults.rate_limit_per_hour",
            defaults.rate_limit_per_hour.to_string(),
            Some("DEALPILOT_AGENT_RATE_LIMIT_PER_HOUR"),
        ),
        (
            "agents.defaults.rate_limit_per_day",
            defaults.rate_limit_per_day.to_string(),
            Some("DEALPILOT_AGENT_RATE_LIMIT_PER_DAY"),
        ),
        ("logging.level", config.logging.level.clone(), Some("DEALPILOT_LOGGING_LEVEL")),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("DEALPILOT_LOGGING_FORMAT"),
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in &fields {
        lines.push(render_line(key, value, source(*key, *env_key)));
    }

    for kind in config.agents.overrides.keys() {
        let key = format!("agents.kinds.{kind}");
        let limits = config.agents.limits_for(&AgentKind::new(kind.as_str()));
        let value = format!(
            "max_execution_time_ms={} max_llm_calls={} rate_limit_per_hour={}",
            limits.max_execution_time_ms, limits.max_llm_calls, limits.rate_limit_per_hour
        );
        lines.push(render_line(&key, &value, source(&key, None)));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("dealpilot.toml"), PathBuf::from("config/dealpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the provider prefix of a key (`sk-ant-...` becomes `sk-***`).
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
