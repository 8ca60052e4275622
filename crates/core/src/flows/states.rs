use serde::{Deserialize, Serialize};

use crate::domain::feedback::{FeedbackId, Rating};

/// Where a single user currently is in a conversation. Each variant carries
/// exactly the data collected so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingText,
    AwaitingRating {
        text: String,
    },
    AwaitingAdminComment {
        target: FeedbackId,
    },
}

impl ConversationState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingText => "awaiting_text",
            Self::AwaitingRating { .. } => "awaiting_rating",
            Self::AwaitingAdminComment { .. } => "awaiting_admin_comment",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingChoice {
    Stars(Rating),
    Skip,
}

impl RatingChoice {
    pub fn rating(self) -> Option<Rating> {
        match self {
            Self::Stars(rating) => Some(rating),
            Self::Skip => None,
        }
    }

    /// Parses `"1"`..`"5"` or `"skip"`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("skip") {
            return Some(Self::Skip);
        }
        value.parse::<u8>().ok().and_then(|stars| Rating::new(stars).ok()).map(Self::Stars)
    }

    pub fn all() -> Vec<Self> {
        Rating::ALL.into_iter().map(Self::Stars).chain([Self::Skip]).collect()
    }

    pub fn token(self) -> String {
        match self {
            Self::Stars(rating) => rating.value().to_string(),
            Self::Skip => "skip".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    StartFeedback,
    TextReceived { text: String },
    RatingChosen(RatingChoice),
    AnnotationRequested { target: FeedbackId },
}

impl FlowEvent {
    /// Event label safe for logs; never includes user-provided text.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartFeedback => "start_feedback",
            Self::TextReceived { .. } => "text_received",
            Self::RatingChosen(_) => "rating_chosen",
            Self::AnnotationRequested { .. } => "annotation_requested",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    PromptForText,
    PromptForRating,
    PersistFeedback { text: String, rating: Option<Rating> },
    ConfirmSubmission,
    PromptForAdminComment { target: FeedbackId },
    ApplyAdminComment { target: FeedbackId, comment: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
