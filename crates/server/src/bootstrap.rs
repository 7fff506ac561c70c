use std::sync::Arc;
use std::time::Duration;

use parley_agent::{build_runtime, AgentProfile, LlmError};
use parley_core::audit::TracingAuditSink;
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_core::escalation::EscalationThresholds;
use parley_core::flows::{AgentRunFlow, FlowEngine};
use parley_core::queue::{QueueEngine, QueueEngineConfig};
use parley_core::{ConversationContextStore, EscalationEvaluator, TriageClassifier};
use parley_db::{
    connect_with_config, migrations, DbPool, SqlApprovalRepository, SqlFeedbackRepository,
    SqlHumanAlertRepository, SqlWebhookQueueRepository,
};
use parley_platform::{HttpMessagingClient, MessagingClient, NoopMessagingClient, WebhookVerifier};
use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::{
    ConversationLocks, DecisionHandler, Dispatcher, PipelineDeps, WorkerConfig,
};
use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub deps: PipelineDeps,
    pub dispatcher: Dispatcher,
    pub decisions: DecisionHandler,
    pub verifier: WebhookVerifier,
}

impl Application {
    pub fn app_state(&self) -> AppState {
        AppState {
            deps: self.deps.clone(),
            dispatcher: self.dispatcher.clone(),
            decisions: self.decisions.clone(),
            verifier: self.verifier.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent runtime unavailable: {0}")]
    Agent(#[source] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_config(&config.database)
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime = build_runtime(&config.agent).map_err(BootstrapError::Agent)?;
    let deps = PipelineDeps {
        queue: Arc::new(SqlWebhookQueueRepository::new(db_pool.clone())),
        approvals: Arc::new(SqlApprovalRepository::new(db_pool.clone())),
        feedback: Arc::new(SqlFeedbackRepository::new(db_pool.clone())),
        alerts: Arc::new(SqlHumanAlertRepository::new(db_pool.clone())),
        runtime,
        messaging: messaging_client(&config),
        audit: Arc::new(TracingAuditSink),
        contexts: ConversationContextStore::new(config.triage.context_window),
        locks: ConversationLocks::default(),
        engine: QueueEngine::with_config(QueueEngineConfig {
            max_attempts: config.queue.max_attempts,
            retry_base_delay_ms: config.queue.retry_base_delay_ms,
            retry_max_delay_ms: config.queue.retry_max_delay_ms,
            claim_timeout_secs: i64::try_from(config.queue.claim_timeout_secs).unwrap_or(i64::MAX),
        }),
        flow: FlowEngine::new(AgentRunFlow),
        triage: TriageClassifier::new(),
        escalation: EscalationEvaluator::new(EscalationThresholds {
            complex_issue_threshold: config.triage.complex_issue_threshold,
            repeated_contact_threshold: config.triage.repeated_contact_threshold,
        }),
        profile: AgentProfile::from_config(&config.agent),
        runtime_timeout: Duration::from_secs(config.agent.runtime_timeout_secs()),
    };

    let dispatcher = Dispatcher::new(deps.clone(), WorkerConfig::from_config(&config.queue));
    let decisions = DecisionHandler::new(deps.clone());
    let verifier = WebhookVerifier::new(config.platform.webhook_secret.clone());
    if !verifier.is_enforced() {
        warn!(
            event_name = "system.bootstrap.webhook_unsigned",
            correlation_id = "bootstrap",
            "platform.webhook_secret not set; webhook signatures are not checked"
        );
    }

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        provider = config.agent.provider.as_str(),
        human_review = config.agent.human_review,
        workers = config.queue.worker_concurrency,
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, deps, dispatcher, decisions, verifier })
}

fn messaging_client(config: &AppConfig) -> Arc<dyn MessagingClient> {
    if !config.platform.delivery_enabled() {
        warn!(
            event_name = "system.bootstrap.delivery_disabled",
            correlation_id = "bootstrap",
            "platform credentials missing; approved replies are logged, not sent"
        );
        return Arc::new(NoopMessagingClient);
    }
    match HttpMessagingClient::from_config(&config.platform) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.delivery_disabled",
                correlation_id = "bootstrap",
                error = %error,
                "messaging client unavailable; approved replies are logged, not sent"
            );
            Arc::new(NoopMessagingClient)
        }
    }
}
