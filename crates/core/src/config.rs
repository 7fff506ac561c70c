use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub platform: PlatformConfig,
    pub agent: AgentConfig,
    pub queue: QueueConfig,
    pub triage: TriageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// Outbound delivery is disabled when unset.
    pub api_base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    pub account_id: Option<u64>,
}

impl PlatformConfig {
    pub fn delivery_enabled(&self) -> bool {
        self.api_base_url.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub provider: AgentProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub human_review: bool,
    pub agent_name: String,
    /// Actor ids allowed to decide approvals. Empty means any actor.
    pub reviewers: Vec<String>,
}

impl AgentConfig {
    /// Bound on one runtime step; a turn makes at most two completions.
    pub fn runtime_timeout_secs(&self) -> u64 {
        self.timeout_secs.saturating_mul(2)
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub worker_concurrency: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub claim_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TriageConfig {
    pub context_window: usize,
    pub complex_issue_threshold: usize,
    pub repeated_contact_threshold: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
    Scripted,
}

impl AgentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Scripted => "scripted",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub agent_provider: Option<AgentProvider>,
    pub agent_model: Option<String>,
    pub platform_api_base_url: Option<String>,
    pub platform_api_token: Option<String>,
    pub platform_webhook_secret: Option<String>,
    pub server_port: Option<u16>,
    pub worker_concurrency: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            platform: PlatformConfig {
                api_base_url: None,
                api_token: None,
                webhook_secret: None,
                account_id: None,
            },
            agent: AgentConfig {
                provider: AgentProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                human_review: true,
                agent_name: "support-agent".to_string(),
                reviewers: Vec::new(),
            },
            queue: QueueConfig {
                max_attempts: 5,
                worker_concurrency: 4,
                retry_base_delay_ms: 1_000,
                retry_max_delay_ms: 60_000,
                poll_interval_ms: 500,
                claim_timeout_secs: 300,
            },
            triage: TriageConfig {
                context_window: 20,
                complex_issue_threshold: 5,
                repeated_contact_threshold: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for AgentProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "scripted" => Ok(Self::Scripted),
            other => Err(ConfigError::Validation(format!(
                "unsupported agent provider `{other}` (expected openai|anthropic|ollama|scripted)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(platform) = patch.platform {
            if let Some(api_base_url) = platform.api_base_url {
                self.platform.api_base_url = Some(api_base_url);
            }
            if let Some(api_token) = platform.api_token {
                self.platform.api_token = Some(secret_value(api_token));
            }
            if let Some(webhook_secret) = platform.webhook_secret {
                self.platform.webhook_secret = Some(secret_value(webhook_secret));
            }
            if let Some(account_id) = platform.account_id {
                self.platform.account_id = Some(account_id);
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(provider) = agent.provider {
                self.agent.provider = provider;
            }
            if let Some(api_key) = agent.api_key {
                self.agent.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = agent.base_url {
                self.agent.base_url = Some(base_url);
            }
            if let Some(model) = agent.model {
                self.agent.model = model;
            }
            if let Some(timeout_secs) = agent.timeout_secs {
                self.agent.timeout_secs = timeout_secs;
            }
            if let Some(human_review) = agent.human_review {
                self.agent.human_review = human_review;
            }
            if let Some(agent_name) = agent.agent_name {
                self.agent.agent_name = agent_name;
            }
            if let Some(reviewers) = agent.reviewers {
                self.agent.reviewers = reviewers;
            }
        }

        if let Some(queue) = patch.queue {
            if let Some(max_attempts) = queue.max_attempts {
                self.queue.max_attempts = max_attempts;
            }
            if let Some(worker_concurrency) = queue.worker_concurrency {
                self.queue.worker_concurrency = worker_concurrency;
            }
            if let Some(retry_base_delay_ms) = queue.retry_base_delay_ms {
                self.queue.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = queue.retry_max_delay_ms {
                self.queue.retry_max_delay_ms = retry_max_delay_ms;
            }
            if let Some(poll_interval_ms) = queue.poll_interval_ms {
                self.queue.poll_interval_ms = poll_interval_ms;
            }
            if let Some(claim_timeout_secs) = queue.claim_timeout_secs {
                self.queue.claim_timeout_secs = claim_timeout_secs;
            }
        }

        if let Some(triage) = patch.triage {
            if let Some(context_window) = triage.context_window {
                self.triage.context_window = context_window;
            }
            if let Some(complex_issue_threshold) = triage.complex_issue_threshold {
                self.triage.complex_issue_threshold = complex_issue_threshold;
            }
            if let Some(repeated_contact_threshold) = triage.repeated_contact_threshold {
                self.triage.repeated_contact_threshold = repeated_contact_threshold;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_PLATFORM_API_BASE_URL") {
            self.platform.api_base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_PLATFORM_API_TOKEN") {
            self.platform.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_PLATFORM_WEBHOOK_SECRET") {
            self.platform.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_PLATFORM_ACCOUNT_ID") {
            self.platform.account_id = Some(parse_u64("PARLEY_PLATFORM_ACCOUNT_ID", &value)?);
        }

        if let Some(value) = read_env("PARLEY_AGENT_PROVIDER") {
            self.agent.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_AGENT_API_KEY") {
            self.agent.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_AGENT_BASE_URL") {
            self.agent.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_AGENT_MODEL") {
            self.agent.model = value;
        }
        if let Some(value) = read_env("PARLEY_AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = parse_u64("PARLEY_AGENT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_AGENT_HUMAN_REVIEW") {
            self.agent.human_review = parse_bool("PARLEY_AGENT_HUMAN_REVIEW", &value)?;
        }
        if let Some(value) = read_env("PARLEY_AGENT_NAME") {
            self.agent.agent_name = value;
        }
        if let Some(value) = read_env("PARLEY_AGENT_REVIEWERS") {
            self.agent.reviewers = value
                .split(',')
                .map(str::trim)
                .filter(|reviewer| !reviewer.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Some(value) = read_env("PARLEY_QUEUE_MAX_ATTEMPTS") {
            self.queue.max_attempts = parse_u32("PARLEY_QUEUE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_QUEUE_WORKER_CONCURRENCY") {
            self.queue.worker_concurrency =
                parse_u32("PARLEY_QUEUE_WORKER_CONCURRENCY", &value)? as usize;
        }
        if let Some(value) = read_env("PARLEY_QUEUE_RETRY_BASE_DELAY_MS") {
            self.queue.retry_base_delay_ms =
                parse_u64("PARLEY_QUEUE_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_QUEUE_RETRY_MAX_DELAY_MS") {
            self.queue.retry_max_delay_ms = parse_u64("PARLEY_QUEUE_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_QUEUE_POLL_INTERVAL_MS") {
            self.queue.poll_interval_ms = parse_u64("PARLEY_QUEUE_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_QUEUE_CLAIM_TIMEOUT_SECS") {
            self.queue.claim_timeout_secs = parse_u64("PARLEY_QUEUE_CLAIM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_TRIAGE_CONTEXT_WINDOW") {
            self.triage.context_window =
                parse_u32("PARLEY_TRIAGE_CONTEXT_WINDOW", &value)? as usize;
        }
        if let Some(value) = read_env("PARLEY_TRIAGE_COMPLEX_ISSUE_THRESHOLD") {
            self.triage.complex_issue_threshold =
                parse_u32("PARLEY_TRIAGE_COMPLEX_ISSUE_THRESHOLD", &value)? as usize;
        }
        if let Some(value) = read_env("PARLEY_TRIAGE_REPEATED_CONTACT_THRESHOLD") {
            self.triage.repeated_contact_threshold =
                parse_u32("PARLEY_TRIAGE_REPEATED_CONTACT_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.agent_provider {
            self.agent.provider = provider;
        }
        if let Some(model) = overrides.agent_model {
            self.agent.model = model;
        }
        if let Some(api_base_url) = overrides.platform_api_base_url {
            self.platform.api_base_url = Some(api_base_url);
        }
        if let Some(api_token) = overrides.platform_api_token {
            self.platform.api_token = Some(secret_value(api_token));
        }
        if let Some(webhook_secret) = overrides.platform_webhook_secret {
            self.platform.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(worker_concurrency) = overrides.worker_concurrency {
            self.queue.worker_concurrency = worker_concurrency;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_platform(&self.platform)?;
        validate_agent(&self.agent)?;
        validate_queue(&self.queue, &self.agent)?;
        validate_triage(&self.triage)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_platform(platform: &PlatformConfig) -> Result<(), ConfigError> {
    if let Some(secret) = &platform.webhook_secret {
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "platform.webhook_secret must not be blank when set".to_string(),
            ));
        }
    }

    let Some(base_url) = &platform.api_base_url else {
        return Ok(());
    };

    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "platform.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    let missing_token = platform
        .api_token
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_token {
        return Err(ConfigError::Validation(
            "platform.api_token is required when platform.api_base_url is set. Create an agent bot access token in the platform's profile settings".to_string(),
        ));
    }

    if platform.account_id.is_none() {
        return Err(ConfigError::Validation(
            "platform.account_id is required when platform.api_base_url is set".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.timeout_secs == 0 || agent.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agent.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if agent.agent_name.trim().is_empty() {
        return Err(ConfigError::Validation("agent.agent_name must not be empty".to_string()));
    }

    if agent.reviewers.iter().any(|reviewer| reviewer.trim().is_empty()) {
        return Err(ConfigError::Validation("agent.reviewers must not contain blank ids".to_string()));
    }

    match agent.provider {
        AgentProvider::OpenAi | AgentProvider::Anthropic => {
            let missing = agent
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "agent.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        AgentProvider::Ollama => {
            let missing =
                agent.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "agent.base_url is required for ollama provider".to_string(),
                ));
            }
        }
        AgentProvider::Scripted => {}
    }

    Ok(())
}

fn validate_queue(queue: &QueueConfig, agent: &AgentConfig) -> Result<(), ConfigError> {
    if queue.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "queue.max_attempts must be greater than zero".to_string(),
        ));
    }

    if queue.worker_concurrency == 0 || queue.worker_concurrency > 256 {
        return Err(ConfigError::Validation(
            "queue.worker_concurrency must be in range 1..=256".to_string(),
        ));
    }

    if queue.retry_max_delay_ms < queue.retry_base_delay_ms {
        return Err(ConfigError::Validation(
            "queue.retry_max_delay_ms must be at least queue.retry_base_delay_ms".to_string(),
        ));
    }

    if queue.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "queue.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    // A claimed turn may wait out a decision's settle and resume on the
    // conversation lock before running its own step.
    let claim_floor = agent.runtime_timeout_secs().saturating_mul(2);
    if queue.claim_timeout_secs <= claim_floor {
        return Err(ConfigError::Validation(format!(
            "queue.claim_timeout_secs ({}) must exceed {} (twice the runtime bound for agent.timeout_secs {}) or live claims are recovered as stale",
            queue.claim_timeout_secs, claim_floor, agent.timeout_secs
        )));
    }

    Ok(())
}

fn validate_triage(triage: &TriageConfig) -> Result<(), ConfigError> {
    if triage.context_window == 0 {
        return Err(ConfigError::Validation(
            "triage.context_window must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    platform: Option<PlatformPatch>,
    agent: Option<AgentPatch>,
    queue: Option<QueuePatch>,
    triage: Option<TriagePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformPatch {
    api_base_url: Option<String>,
    api_token: Option<String>,
    webhook_secret: Option<String>,
    account_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    provider: Option<AgentProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    human_review: Option<bool>,
    agent_name: Option<String>,
    reviewers: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuePatch {
    max_attempts: Option<u32>,
    worker_concurrency: Option<usize>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    claim_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TriagePatch {
    context_window: Option<usize>,
    complex_issue_threshold: Option<usize>,
    repeated_contact_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
