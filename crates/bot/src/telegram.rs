//! Telegram Bot API adapter.
//!
//! Long-polls `getUpdates` for inbound events and implements [`Outbox`] on
//! top of `sendMessage`, `editMessageReplyMarkup` and `answerCallbackQuery`.
//! Messages are sent in HTML parse mode; templates escape user text.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use feedloop_core::config::TelegramConfig;
use feedloop_core::domain::feedback::UserId;

use crate::commands::{parse_text_command, CallbackData, TextCommand};
use crate::events::{ActionRef, ChatId, EventSource, InboundEnvelope, InboundEvent, MessageRef};
use crate::menus::ChoiceSet;
use crate::outbox::{DeliveryError, Outbox};
use crate::runner::{TransportError, UpdateSource};

const PARSE_MODE: &str = "HTML";
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Debug, Serialize)]
struct MenuButton<'a> {
    text: &'a str,
}

fn source_from(user: &User, chat_id: i64) -> EventSource {
    EventSource {
        user_id: UserId(user.id),
        chat_id: ChatId(chat_id),
        username: user.username.clone(),
        display_name: user.first_name.clone(),
        surname: user.last_name.clone(),
    }
}

/// Maps one raw update to an inbound event. Menu labels and slash commands
/// become commands; callback payloads become choices or moderation actions.
pub fn map_update(update: &Update) -> InboundEnvelope {
    let correlation_id = format!("upd-{}", update.update_id);

    if let Some(query) = &update.callback_query {
        let chat_id = query.message.as_ref().map_or(query.from.id, |message| message.chat.id);
        let source = source_from(&query.from, chat_id);
        let message_ref = query.message.as_ref().map(|message| MessageRef {
            chat_id: ChatId(message.chat.id),
            message_id: message.message_id,
        });
        let action_ref = Some(ActionRef(query.id.clone()));

        let event = match query.data.as_deref().map(CallbackData::parse) {
            Some(Ok(CallbackData::Rating(value))) => {
                InboundEvent::Choice { source, value, message_ref, action_ref }
            }
            Some(Ok(CallbackData::Moderation { action, target })) => {
                InboundEvent::Action { source, target, action, message_ref, action_ref }
            }
            Some(Err(error)) => InboundEvent::Unsupported {
                source: Some(source),
                kind: format!("callback:{error}"),
            },
            None => InboundEvent::Unsupported {
                source: Some(source),
                kind: "callback_without_data".to_owned(),
            },
        };
        return InboundEnvelope::new(correlation_id, event);
    }

    if let Some(message) = &update.message {
        let Some(user) = &message.from else {
            return InboundEnvelope::new(
                correlation_id,
                InboundEvent::Unsupported { source: None, kind: "anonymous_message".to_owned() },
            );
        };
        let source = source_from(user, message.chat.id);

        let event = match message.text.as_deref() {
            Some(text) => match parse_text_command(text) {
                Some(TextCommand::StartFeedback) => InboundEvent::StartFeedback { source },
                Some(TextCommand::Menu(command)) => InboundEvent::Command { source, command },
                None => InboundEvent::Text { source, text: text.to_owned() },
            },
            None => InboundEvent::Unsupported {
                source: Some(source),
                kind: "non_text_message".to_owned(),
            },
        };
        return InboundEnvelope::new(correlation_id, event);
    }

    InboundEnvelope::new(
        correlation_id,
        InboundEvent::Unsupported { source: None, kind: "unknown_update".to_owned() },
    )
}

pub fn reply_markup(choices: &ChoiceSet) -> Value {
    match choices {
        ChoiceSet::Inline(rows) => {
            let keyboard: Vec<Vec<InlineButton<'_>>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| InlineButton {
                            text: &button.label,
                            callback_data: &button.data,
                        })
                        .collect()
                })
                .collect();
            json!({ "inline_keyboard": keyboard })
        }
        ChoiceSet::Menu(rows) => {
            let keyboard: Vec<Vec<MenuButton<'_>>> = rows
                .iter()
                .map(|row| row.iter().map(|label| MenuButton { text: label }).collect())
                .collect();
            json!({ "keyboard": keyboard, "resize_keyboard": true })
        }
    }
}

/// Why a Bot API call failed: the request never completed, the response
/// was not the expected JSON, or the API answered `ok: false`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallFailure {
    Request(String),
    Decode(String),
    Api(String),
}

impl From<CallFailure> for TransportError {
    fn from(value: CallFailure) -> Self {
        match value {
            CallFailure::Decode(message) => Self::Decode(message),
            CallFailure::Request(message) | CallFailure::Api(message) => Self::Poll(message),
        }
    }
}

impl From<CallFailure> for DeliveryError {
    fn from(value: CallFailure) -> Self {
        match value {
            CallFailure::Api(message) => Self::Rejected(message),
            CallFailure::Request(message) | CallFailure::Decode(message) => {
                Self::Transport(message)
            }
        }
    }
}

pub struct TelegramClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
    poll_timeout_secs: u64,
    offset: Mutex<Option<i64>>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs) + REQUEST_GRACE)
            .build()
            .map_err(|error| TransportError::Poll(error.without_url().to_string()))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            bot_token: config.bot_token.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            offset: Mutex::new(None),
        })
    }

    /// Calls one Bot API method. Errors never carry the request URL, which
    /// embeds the token.
    async fn call<T>(&self, method: &str, body: &Value) -> Result<T, CallFailure>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{method}", self.api_base_url, self.bot_token.expose_secret());
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| CallFailure::Request(error.without_url().to_string()))?;
        let status = response.status();
        let parsed: ApiResponse<T> = response.json().await.map_err(|error| {
            CallFailure::Decode(format!("{method}: HTTP {status}: {}", error.without_url()))
        })?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(CallFailure::Api(format!(
                "{method}: {}",
                parsed.description.unwrap_or_else(|| format!("HTTP {status}"))
            ))),
        }
    }

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<Value>,
    ) -> Result<MessageRef, DeliveryError> {
        let mut body = json!({ "chat_id": chat.0, "text": text, "parse_mode": PARSE_MODE });
        if let Some(markup) = markup {
            body["reply_markup"] = markup;
        }
        let message: Message = self.call("sendMessage", &body).await?;
        Ok(MessageRef { chat_id: ChatId(message.chat.id), message_id: message.message_id })
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn next_batch(&self) -> Result<Vec<InboundEnvelope>, TransportError> {
        let mut offset = self.offset.lock().await;
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = *offset {
            body["offset"] = json!(offset);
        }

        let updates: Vec<Update> =
            self.call("getUpdates", &body).await?;
        if let Some(last) = updates.iter().map(|update| update.update_id).max() {
            *offset = Some(last + 1);
        }
        debug!(
            event_name = "ingress.bot.updates_polled",
            count = updates.len(),
            "polled telegram updates"
        );
        Ok(updates.iter().map(map_update).collect())
    }
}

#[async_trait]
impl Outbox for TelegramClient {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, DeliveryError> {
        self.send_message(chat, text, None).await
    }

    async fn send_text_with_choices(
        &self,
        chat: ChatId,
        text: &str,
        choices: &ChoiceSet,
    ) -> Result<MessageRef, DeliveryError> {
        self.send_message(chat, text, Some(reply_markup(choices))).await
    }

    async fn edit_prior_message(
        &self,
        message: &MessageRef,
        remove_choices: bool,
    ) -> Result<(), DeliveryError> {
        if !remove_choices {
            return Ok(());
        }
        let body = json!({
            "chat_id": message.chat_id.0,
            "message_id": message.message_id,
            "reply_markup": { "inline_keyboard": [] },
        });
        // Telegram answers with the edited message, or `true` for inline messages.
        let _: Value = self.call("editMessageReplyMarkup", &body).await?;
        Ok(())
    }

    async fn acknowledge_action(
        &self,
        action: &ActionRef,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError> {
        let mut body = json!({ "callback_query_id": action.0, "show_alert": alert });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}
