use std::sync::Arc;

use leavewatch_core::analytics::{AnalyticsRecorder, NoopAnalytics};
use leavewatch_core::compliance::{Collaborators, ComplianceService};
use leavewatch_core::config::{AppConfig, ConfigError, LoadOptions};
use leavewatch_core::errors::IntegrationError;
use leavewatch_core::{MessageTemplates, OrgHierarchy, SystemClock, UnavailableHrSystem};
use leavewatch_db::{connect, migrations, DbPool, SqlAnalyticsSink, SqlDocumentStore};
use leavewatch_slack::{SlackApiError, SlackWebClient};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analytics_queue;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ComplianceService>,
    pub slack: Arc<SlackWebClient>,
    /// Present when analytics is enabled; resolves once the queue is drained.
    pub analytics_writer: Option<JoinHandle<usize>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack client could not be built: {0}")]
    Slack(#[from] SlackApiError),
    #[error("org directory could not be loaded: {0}")]
    OrgDirectory(#[source] IntegrationError),
}

pub async fn bootstrap(
    options: LoadOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, shutdown).await
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let directory = match config.org.directory_path.as_deref() {
        Some(path) => OrgHierarchy::load(path, &config.approval.hr_user_ids)
            .map_err(BootstrapError::OrgDirectory)?,
        None => {
            if config.approval.enabled {
                warn!(
                    event_name = "system.bootstrap.no_org_directory",
                    correlation_id = "bootstrap",
                    "approvals enabled without an org directory; every request will fail routing"
                );
            }
            OrgHierarchy::new(Vec::new(), &config.approval.hr_user_ids)
        }
    };

    let mut analytics_writer = None;
    let analytics: Arc<dyn AnalyticsRecorder> = if config.analytics.enabled {
        let sink = Arc::new(SqlAnalyticsSink::new(db_pool.clone()));
        let (recorder, handle) = analytics_queue::start(sink, &config.analytics, shutdown);
        analytics_writer = Some(handle);
        Arc::new(recorder)
    } else {
        Arc::new(NoopAnalytics)
    };

    let slack = Arc::new(SlackWebClient::new(&config.slack)?);
    let service = ComplianceService::build(
        &config,
        Collaborators {
            store: Arc::new(SqlDocumentStore::new(db_pool.clone())),
            messenger: slack.clone(),
            hr: Arc::new(UnavailableHrSystem::default()),
            directory: Arc::new(directory),
            clock: Arc::new(SystemClock),
            analytics,
            templates: Arc::new(MessageTemplates::with_overrides(config.templates.directory.as_deref())),
        },
    );
    info!(
        event_name = "system.bootstrap.wired",
        correlation_id = "bootstrap",
        approvals_enabled = config.approval.enabled,
        analytics_enabled = config.analytics.enabled,
        "compliance service wired"
    );

    Ok(Application { config, db_pool, service: Arc::new(service), slack, analytics_writer })
}
