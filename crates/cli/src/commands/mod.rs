pub mod config;
pub mod doctor;
pub mod migrate;
pub mod pending;
pub mod stats;

use feedloop_core::config::{AppConfig, LoadOptions};
use feedloop_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, failure: Failure) -> Self {
        let (error_class, message, exit_code) = failure;
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Error class, message, and exit code of a failed command step.
pub(crate) type Failure = (&'static str, String, u8);

pub(crate) fn load_config() -> Result<AppConfig, Failure> {
    AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2))
}

pub(crate) fn runtime() -> Result<Runtime, Failure> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| ("runtime_init", format!("failed to initialize async runtime: {error}"), 3))
}

/// Connects and refuses to continue while migrations are outstanding, so
/// read commands never report against a partial schema.
pub(crate) async fn open_migrated_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4))?;

    match migrations::pending_count(&pool).await {
        Ok(0) => Ok(pool),
        Ok(pending) => {
            pool.close().await;
            Err((
                "schema_not_ready",
                format!("{pending} migration(s) pending; run `feedloop migrate` first"),
                5,
            ))
        }
        Err(error) => {
            pool.close().await;
            Err(("db_connectivity", error.to_string(), 4))
        }
    }
}

/// Runs a read command body against a migrated pool on a fresh runtime.
pub(crate) fn with_migrated_pool<F, Fut>(command: &str, body: F) -> CommandResult
where
    F: FnOnce(DbPool) -> Fut,
    Fut: std::future::Future<Output = Result<String, Failure>>,
{
    let outcome = load_config().and_then(|config| {
        let runtime = runtime()?;
        runtime.block_on(async {
            let pool = open_migrated_pool(&config).await?;
            let result = body(pool.clone()).await;
            pool.close().await;
            result
        })
    });

    match outcome {
        Ok(message) => CommandResult::success(command, message),
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
