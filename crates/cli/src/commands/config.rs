use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source =
            field_source(field.key, field.env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let field = |key, env_key, value: String| Field { key, env_key, value };
    vec![
        field("database.url", "PARLEY_DATABASE_URL", config.database.url.clone()),
        field(
            "database.max_connections",
            "PARLEY_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        field(
            "platform.api_base_url",
            "PARLEY_PLATFORM_API_BASE_URL",
            config.platform.api_base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field(
            "platform.api_token",
            "PARLEY_PLATFORM_API_TOKEN",
            redacted(config.platform.api_token.is_some()),
        ),
        field(
            "platform.webhook_secret",
            "PARLEY_PLATFORM_WEBHOOK_SECRET",
            redacted(config.platform.webhook_secret.is_some()),
        ),
        field("agent.provider", "PARLEY_AGENT_PROVIDER", config.agent.provider.as_str().to_string()),
        field("agent.model", "PARLEY_AGENT_MODEL", config.agent.model.clone()),
        field(
            "agent.base_url",
            "PARLEY_AGENT_BASE_URL",
            config.agent.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("agent.api_key", "PARLEY_AGENT_API_KEY", redacted(config.agent.api_key.is_some())),
        field(
            "agent.human_review",
            "PARLEY_AGENT_HUMAN_REVIEW",
            config.agent.human_review.to_string(),
        ),
        field(
            "queue.max_attempts",
            "PARLEY_QUEUE_MAX_ATTEMPTS",
            config.queue.max_attempts.to_string(),
        ),
        field(
            "queue.worker_concurrency",
            "PARLEY_QUEUE_WORKER_CONCURRENCY",
            config.queue.worker_concurrency.to_string(),
        ),
        field(
            "triage.context_window",
            "PARLEY_TRIAGE_CONTEXT_WINDOW",
            config.triage.context_window.to_string(),
        ),
        field("server.bind_address", "PARLEY_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        field("server.port", "PARLEY_SERVER_PORT", config.server.port.to_string()),
        field("logging.level", "PARLEY_LOGGING_LEVEL", config.logging.level.clone()),
        field("logging.format", "PARLEY_LOGGING_FORMAT", config.logging.format.as_str().to_string()),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
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
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
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

fn redacted(is_set: bool) -> String {
    if is_set { "<redacted>" } else { "<unset>" }.to_string()
}
