use std::sync::Arc;

use feedloop_bot::{BotContext, PollingRunner, RetryPolicy, Router, TelegramClient, TransportError};
use feedloop_core::config::{AppConfig, ConfigError};
use feedloop_db::{connect_with_config, migrations, DbPool, SqlFeedbackRepository};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub router: Router,
    pub runner: PollingRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("telegram client setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Connects, migrates, and wires the bot. The config is validated again
/// since callers may have built it by hand.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    config.validate()?;
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let telegram = Arc::new(TelegramClient::new(&config.telegram)?);
    let repository = Arc::new(SqlFeedbackRepository::new(db_pool.clone()));
    let context = BotContext::from_config(&config, repository, telegram.clone());
    if context.admins.is_empty() {
        tracing::warn!(
            event_name = "system.bootstrap.no_admins",
            correlation_id = "bootstrap",
            "no admin ids configured; new feedback will not be forwarded to anyone"
        );
    }
    info!(
        event_name = "system.bootstrap.bot_ready",
        correlation_id = "bootstrap",
        admins = context.admins.len(),
        "bot context initialized"
    );

    let router = Router::new(Arc::new(context));
    let runner = PollingRunner::new(telegram, router.clone(), RetryPolicy::default());

    Ok(Application { config, db_pool, router, runner })
}
