use std::fmt;

use feedloop_core::domain::feedback::{Author, FeedbackId, UserId};
use feedloop_core::flows::RatingChoice;

/// Telegram chat identifier. Private chats share the user's id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl From<UserId> for ChatId {
    fn from(value: UserId) -> Self {
        Self(value.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message previously sent by the bot that may still carry buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Handle used to acknowledge a button press.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRef(pub String);

/// Who an inbound event came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSource {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub username: Option<String>,
    pub display_name: String,
    pub surname: Option<String>,
}

impl EventSource {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id: ChatId::from(user_id),
            username: None,
            display_name: display_name.into(),
            surname: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn author(&self) -> Author {
        Author {
            user_id: self.user_id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            surname: self.surname.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MenuCommand {
    Start,
    MyFeedback,
    Help,
    AdminPanel,
    PendingFeedback,
    Stats,
    AllFeedback,
    BackToMain,
}

impl MenuCommand {
    pub fn requires_admin(self) -> bool {
        matches!(
            self,
            Self::AdminPanel
                | Self::PendingFeedback
                | Self::Stats
                | Self::AllFeedback
                | Self::BackToMain
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::MyFeedback => "my_feedback",
            Self::Help => "help",
            Self::AdminPanel => "admin_panel",
            Self::PendingFeedback => "pending_feedback",
            Self::Stats => "stats",
            Self::AllFeedback => "all_feedback",
            Self::BackToMain => "back_to_main",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModerationAction {
    Approve,
    Reject,
    Annotate,
}

impl ModerationAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Annotate => "annotate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    StartFeedback {
        source: EventSource,
    },
    Text {
        source: EventSource,
        text: String,
    },
    Choice {
        source: EventSource,
        value: RatingChoice,
        message_ref: Option<MessageRef>,
        action_ref: Option<ActionRef>,
    },
    Command {
        source: EventSource,
        command: MenuCommand,
    },
    Action {
        source: EventSource,
        target: FeedbackId,
        action: ModerationAction,
        message_ref: Option<MessageRef>,
        action_ref: Option<ActionRef>,
    },
    Unsupported {
        source: Option<EventSource>,
        kind: String,
    },
}

impl InboundEvent {
    pub fn source(&self) -> Option<&EventSource> {
        match self {
            Self::StartFeedback { source }
            | Self::Text { source, .. }
            | Self::Choice { source, .. }
            | Self::Command { source, .. }
            | Self::Action { source, .. } => Some(source),
            Self::Unsupported { source, .. } => source.as_ref(),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.source().map(|source| source.user_id)
    }

    /// Label safe for logs; never includes user-provided text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartFeedback { .. } => "start_feedback",
            Self::Text { .. } => "text",
            Self::Choice { .. } => "choice",
            Self::Command { .. } => "command",
            Self::Action { .. } => "action",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub correlation_id: String,
    pub event: InboundEvent,
}

impl InboundEnvelope {
    pub fn new(correlation_id: impl Into<String>, event: InboundEvent) -> Self {
        Self { correlation_id: correlation_id.into(), event }
    }
}

/// What the router did with an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded,
    Processed,
    Refused,
    Ignored,
}
