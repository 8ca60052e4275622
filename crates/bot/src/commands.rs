use thiserror::Error;

use feedloop_core::domain::feedback::FeedbackId;
use feedloop_core::flows::RatingChoice;

use crate::events::{MenuCommand, ModerationAction};

pub const LEAVE_FEEDBACK_LABEL: &str = "📝 Leave feedback";
pub const MY_FEEDBACK_LABEL: &str = "📊 My feedback";
pub const HELP_LABEL: &str = "ℹ️ Help";
pub const NEW_FEEDBACK_LABEL: &str = "📋 New feedback";
pub const STATS_LABEL: &str = "📊 Statistics";
pub const ALL_FEEDBACK_LABEL: &str = "🔍 All feedback";
pub const MAIN_MENU_LABEL: &str = "🔙 Main menu";

/// Interpretation of a plain text message before it reaches the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextCommand {
    StartFeedback,
    Menu(MenuCommand),
}

/// Recognizes menu button labels and slash commands. Anything else is
/// conversation text.
pub fn parse_text_command(text: &str) -> Option<TextCommand> {
    let trimmed = text.trim();
    if let Some(command) = parse_slash_command(trimmed) {
        return Some(command);
    }

    let command = match trimmed {
        LEAVE_FEEDBACK_LABEL => TextCommand::StartFeedback,
        MY_FEEDBACK_LABEL => TextCommand::Menu(MenuCommand::MyFeedback),
        HELP_LABEL => TextCommand::Menu(MenuCommand::Help),
        NEW_FEEDBACK_LABEL => TextCommand::Menu(MenuCommand::PendingFeedback),
        STATS_LABEL => TextCommand::Menu(MenuCommand::Stats),
        ALL_FEEDBACK_LABEL => TextCommand::Menu(MenuCommand::AllFeedback),
        MAIN_MENU_LABEL => TextCommand::Menu(MenuCommand::BackToMain),
        _ => return None,
    };
    Some(command)
}

fn parse_slash_command(text: &str) -> Option<TextCommand> {
    let head = text.strip_prefix('/')?.split_whitespace().next()?;
    // `/start@feedloop_bot` in group chats
    let name = head.split_once('@').map_or(head, |(name, _)| name).to_ascii_lowercase();

    let command = match name.as_str() {
        "start" => TextCommand::Menu(MenuCommand::Start),
        "feedback" => TextCommand::StartFeedback,
        "my" => TextCommand::Menu(MenuCommand::MyFeedback),
        "help" => TextCommand::Menu(MenuCommand::Help),
        "admin" => TextCommand::Menu(MenuCommand::AdminPanel),
        "pending" => TextCommand::Menu(MenuCommand::PendingFeedback),
        "stats" => TextCommand::Menu(MenuCommand::Stats),
        "all" => TextCommand::Menu(MenuCommand::AllFeedback),
        _ => return None,
    };
    Some(command)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackData {
    Rating(RatingChoice),
    Moderation { action: ModerationAction, target: FeedbackId },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackParseError {
    #[error("callback payload `{0}` has no action prefix")]
    MissingPrefix(String),
    #[error("unknown callback action `{0}`")]
    UnknownAction(String),
    #[error("invalid rating choice `{0}`")]
    InvalidRating(String),
    #[error("callback `{0}` is missing a feedback id")]
    MissingTarget(String),
}

impl CallbackData {
    pub fn parse(raw: &str) -> Result<Self, CallbackParseError> {
        let (prefix, rest) =
            raw.split_once('_').ok_or_else(|| CallbackParseError::MissingPrefix(raw.to_owned()))?;

        let action = match prefix {
            "rating" => {
                return RatingChoice::parse(rest)
                    .map(Self::Rating)
                    .ok_or_else(|| CallbackParseError::InvalidRating(rest.to_owned()));
            }
            "approve" => ModerationAction::Approve,
            "reject" => ModerationAction::Reject,
            "comment" => ModerationAction::Annotate,
            other => return Err(CallbackParseError::UnknownAction(other.to_owned())),
        };

        if rest.trim().is_empty() {
            return Err(CallbackParseError::MissingTarget(raw.to_owned()));
        }
        Ok(Self::Moderation { action, target: FeedbackId(rest.to_owned()) })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Rating(choice) => format!("rating_{}", choice.token()),
            Self::Moderation { action, target } => {
                let prefix = match action {
                    ModerationAction::Approve => "approve",
                    ModerationAction::Reject => "reject",
                    ModerationAction::Annotate => "comment",
                };
                format!("{prefix}_{target}")
            }
        }
    }
}
