use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::events::{ActionRef, ChatId, MessageRef};
use crate::menus::{ChoiceSet, OutboundMessage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("recipient {0} cannot be reached")]
    Unreachable(ChatId),
    #[error("messaging api rejected the call: {0}")]
    Rejected(String),
    #[error("messaging transport failed: {0}")]
    Transport(String),
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, DeliveryError>;

    async fn send_text_with_choices(
        &self,
        chat: ChatId,
        text: &str,
        choices: &ChoiceSet,
    ) -> Result<MessageRef, DeliveryError>;

    /// Replaces the buttons of a message the bot sent earlier, or removes
    /// them entirely.
    async fn edit_prior_message(
        &self,
        message: &MessageRef,
        remove_choices: bool,
    ) -> Result<(), DeliveryError>;

    async fn acknowledge_action(
        &self,
        action: &ActionRef,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError>;

    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<MessageRef, DeliveryError> {
        match &message.choices {
            Some(choices) => self.send_text_with_choices(chat, &message.text, choices).await,
            None => self.send_text(chat, &message.text).await,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub text: String,
    pub choices: Option<ChoiceSet>,
    pub message_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acknowledgement {
    pub action: ActionRef,
    pub text: Option<String>,
    pub alert: bool,
}

#[derive(Default)]
struct RecordedState {
    sent: Vec<SentMessage>,
    edits: Vec<MessageRef>,
    acknowledgements: Vec<Acknowledgement>,
    next_message_id: i64,
}

/// Outbox that keeps everything in memory. Chats can be marked unreachable
/// or slow, and texts containing a marker can be rejected, to exercise
/// delivery failure paths.
#[derive(Clone, Default)]
pub struct RecordingOutbox {
    state: Arc<Mutex<RecordedState>>,
    failing: Arc<HashSet<ChatId>>,
    delays: Arc<HashMap<ChatId, Duration>>,
    rejected_marker: Option<Arc<str>>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing(mut self, chats: impl IntoIterator<Item = ChatId>) -> Self {
        self.failing = Arc::new(chats.into_iter().collect());
        self
    }

    /// Rejects any message whose text contains `marker`, the way the Bot API
    /// refuses a malformed or oversized message.
    pub fn with_rejected_text(mut self, marker: &str) -> Self {
        self.rejected_marker = Some(Arc::from(marker));
        self
    }

    pub fn with_delay(mut self, chat: ChatId, delay: Duration) -> Self {
        let mut delays = (*self.delays).clone();
        delays.insert(chat, delay);
        self.delays = Arc::new(delays);
        self
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn sent_to(&self, chat: ChatId) -> Vec<SentMessage> {
        self.state.lock().await.sent.iter().filter(|message| message.chat == chat).cloned().collect()
    }

    pub async fn edits(&self) -> Vec<MessageRef> {
        self.state.lock().await.edits.clone()
    }

    pub async fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.state.lock().await.acknowledgements.clone()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.sent.clear();
        state.edits.clear();
        state.acknowledgements.clear();
    }

    async fn record(
        &self,
        chat: ChatId,
        text: &str,
        choices: Option<&ChoiceSet>,
    ) -> Result<MessageRef, DeliveryError> {
        if let Some(delay) = self.delays.get(&chat) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&chat) {
            return Err(DeliveryError::Unreachable(chat));
        }
        if self.rejected_marker.as_deref().is_some_and(|marker| text.contains(marker)) {
            return Err(DeliveryError::Rejected("message text rejected".to_owned()));
        }

        let mut state = self.state.lock().await;
        state.next_message_id += 1;
        let message_id = state.next_message_id;
        state.sent.push(SentMessage {
            chat,
            text: text.to_owned(),
            choices: choices.cloned(),
            message_id,
        });
        Ok(MessageRef { chat_id: chat, message_id })
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, DeliveryError> {
        self.record(chat, text, None).await
    }

    async fn send_text_with_choices(
        &self,
        chat: ChatId,
        text: &str,
        choices: &ChoiceSet,
    ) -> Result<MessageRef, DeliveryError> {
        self.record(chat, text, Some(choices)).await
    }

    async fn edit_prior_message(
        &self,
        message: &MessageRef,
        _remove_choices: bool,
    ) -> Result<(), DeliveryError> {
        self.state.lock().await.edits.push(message.clone());
        Ok(())
    }

    async fn acknowledge_action(
        &self,
        action: &ActionRef,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError> {
        self.state.lock().await.acknowledgements.push(Acknowledgement {
            action: action.clone(),
            text: text.map(str::to_owned),
            alert,
        });
        Ok(())
    }
}
