use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use feedloop_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// Config key, the environment variables that can set it, and how to render
/// its effective value.
struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: fn(&AppConfig) -> String,
}

const FIELDS: &[Field] = &[
    Field {
        key: "database.url",
        env_keys: &["FEEDLOOP_DATABASE_URL"],
        value: |config| config.database.url.clone(),
    },
    Field {
        key: "database.max_connections",
        env_keys: &["FEEDLOOP_DATABASE_MAX_CONNECTIONS"],
        value: |config| config.database.max_connections.to_string(),
    },
    Field {
        key: "database.timeout_secs",
        env_keys: &["FEEDLOOP_DATABASE_TIMEOUT_SECS"],
        value: |config| config.database.timeout_secs.to_string(),
    },
    Field {
        key: "telegram.bot_token",
        env_keys: &["FEEDLOOP_TELEGRAM_BOT_TOKEN", "BOT_TOKEN"],
        value: |config| redact_token(config.telegram.bot_token.expose_secret()),
    },
    Field {
        key: "telegram.api_base_url",
        env_keys: &["FEEDLOOP_TELEGRAM_API_BASE_URL"],
        value: |config| config.telegram.api_base_url.clone(),
    },
    Field {
        key: "telegram.poll_timeout_secs",
        env_keys: &["FEEDLOOP_TELEGRAM_POLL_TIMEOUT_SECS"],
        value: |config| config.telegram.poll_timeout_secs.to_string(),
    },
    Field {
        key: "admins.ids",
        env_keys: &["FEEDLOOP_ADMIN_IDS", "ADMIN_IDS"],
        value: |config| {
            if config.admins.ids.is_empty() {
                return "<none>".to_string();
            }
            config.admins.ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
        },
    },
    Field {
        key: "notifications.send_timeout_ms",
        env_keys: &["FEEDLOOP_NOTIFICATIONS_SEND_TIMEOUT_MS"],
        value: |config| config.notifications.send_timeout_ms.to_string(),
    },
    Field {
        key: "server.bind_address",
        env_keys: &["FEEDLOOP_SERVER_BIND_ADDRESS"],
        value: |config| config.server.bind_address.clone(),
    },
    Field {
        key: "server.health_check_port",
        env_keys: &["FEEDLOOP_SERVER_HEALTH_CHECK_PORT"],
        value: |config| config.server.health_check_port.to_string(),
    },
    Field {
        key: "server.graceful_shutdown_secs",
        env_keys: &["FEEDLOOP_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        value: |config| config.server.graceful_shutdown_secs.to_string(),
    },
    Field {
        key: "logging.level",
        env_keys: &["FEEDLOOP_LOGGING_LEVEL", "FEEDLOOP_LOG_LEVEL"],
        value: |config| config.logging.level.clone(),
    },
    Field {
        key: "logging.format",
        env_keys: &["FEEDLOOP_LOGGING_FORMAT", "FEEDLOOP_LOG_FORMAT"],
        value: |config| format!("{:?}", config.logging.format),
    },
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in FIELDS {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &(field.value)(&config), source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("feedloop.toml"), PathBuf::from("config/feedloop.toml")]
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
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

/// Keeps the public bot id and hides the secret half.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_token};

    #[test]
    fn bot_token_keeps_only_the_bot_id() {
        assert_eq!(redact_token("123456:AAE-secret"), "123456:***");
        assert_eq!(redact_token("   "), "<empty>");
        assert_eq!(redact_token("opaque"), "<redacted>");
    }

    #[test]
    fn nested_keys_are_found_in_the_config_file() {
        let doc: Value = "[telegram]\nbot_token = \"1:x\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "telegram.bot_token"));
        assert!(!contains_path(&doc, "telegram.api_base_url"));
        assert!(!contains_path(&doc, "admins.ids"));
    }
}
