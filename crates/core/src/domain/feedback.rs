use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedbackId(pub String);

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub user_id: UserId,
    pub username: Option<String>,
    pub display_name: String,
    pub surname: Option<String>,
}

impl Author {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self { user_id, username: None, display_name: display_name.into(), surname: None }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_surname(mut self, surname: impl Into<String>) -> Self {
        self.surname = Some(surname.into());
        self
    }

    /// `@username` when present, otherwise the display name.
    pub fn handle(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.display_name.clone(),
        }
    }
}

/// Star rating, always within `1..=5`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;
    pub const ALL: [Self; 5] = [Self(1), Self(2), Self(3), Self(4), Self(5)];

    pub fn new(value: u8) -> Result<Self, DomainError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::InvalidRating(i64::from(value)))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<i64> for Rating {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value).map_err(|_| DomainError::InvalidRating(value)).and_then(Self::new)
    }
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub comment: Option<String>,
    pub moderated_at: DateTime<Utc>,
}

/// Moderation status of a record. A pending record has no verdict and no
/// moderation timestamp; a decided one always has both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Moderation {
    #[default]
    Pending,
    Decided(Decision),
}

impl Moderation {
    pub fn is_moderated(&self) -> bool {
        matches!(self, Self::Decided(_))
    }

    pub fn is_approved(&self) -> Option<bool> {
        match self {
            Self::Pending => None,
            Self::Decided(decision) => Some(decision.verdict.is_approved()),
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Decided(decision) => decision.comment.as_deref(),
        }
    }

    pub fn moderated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Pending => None,
            Self::Decided(decision) => Some(decision.moderated_at),
        }
    }

    /// Applies a verdict. A `None` comment keeps whatever comment the record
    /// already carries.
    pub fn decide(
        &self,
        verdict: Verdict,
        comment: Option<String>,
        moderated_at: DateTime<Utc>,
    ) -> Self {
        let comment = comment.or_else(|| self.comment().map(str::to_owned));
        Self::Decided(Decision { verdict, comment, moderated_at })
    }

    /// Rebuilds the status from the flat stored columns, rejecting rows that
    /// break the moderated/approved/timestamp pairing.
    pub fn from_parts(
        is_moderated: bool,
        is_approved: Option<bool>,
        comment: Option<String>,
        moderated_at: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        match (is_moderated, is_approved, moderated_at) {
            (false, None, None) => Ok(Self::Pending),
            (true, Some(approved), Some(moderated_at)) => Ok(Self::Decided(Decision {
                verdict: if approved { Verdict::Approved } else { Verdict::Rejected },
                comment,
                moderated_at,
            })),
            _ => Err(DomainError::InvariantViolation(format!(
                "inconsistent moderation fields: is_moderated={is_moderated}, is_approved={is_approved:?}, moderated_at_set={}",
                moderated_at.is_some()
            ))),
        }
    }
}

/// A feedback entry that has been validated but not yet persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedback {
    pub author: Author,
    pub text: String,
    pub rating: Option<Rating>,
}

impl NewFeedback {
    pub fn new(
        author: Author,
        text: impl Into<String>,
        rating: Option<Rating>,
    ) -> Result<Self, DomainError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(DomainError::EmptyText);
        }
        Ok(Self { author, text, rating })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: FeedbackId,
    pub author: Author,
    pub text: String,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
    pub moderation: Moderation,
}

impl FeedbackRecord {
    pub fn from_new(id: FeedbackId, new: NewFeedback, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            author: new.author,
            text: new.text,
            rating: new.rating,
            created_at,
            moderation: Moderation::Pending,
        }
    }

    pub fn is_moderated(&self) -> bool {
        self.moderation.is_moderated()
    }

    pub fn is_approved(&self) -> Option<bool> {
        self.moderation.is_approved()
    }

    pub fn status(&self) -> FeedbackStatus {
        match self.moderation.is_approved() {
            None => FeedbackStatus::Pending,
            Some(true) => FeedbackStatus::Approved,
            Some(false) => FeedbackStatus::Rejected,
        }
    }

    pub fn moderate(&mut self, verdict: Verdict, comment: Option<String>, now: DateTime<Utc>) {
        self.moderation = self.moderation.decide(verdict, comment, now);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u64,
    pub moderated: u64,
    pub approved: u64,
    pub rejected: u64,
    pub pending: u64,
}

impl FeedbackStats {
    /// Share of moderated records that were approved, rounded to the nearest
    /// whole percent with exact halves going to the even neighbour (1 of 8
    /// is 12%). Zero when nothing has been moderated yet.
    pub fn approval_percentage(&self) -> u32 {
        if self.moderated == 0 {
            return 0;
        }
        let ratio = self.approved as f64 / self.moderated as f64 * 100.0;
        let floor = ratio.floor();
        let rounded = match (ratio - floor).partial_cmp(&0.5) {
            Some(std::cmp::Ordering::Less) => floor,
            Some(std::cmp::Ordering::Greater) => floor + 1.0,
            _ if floor % 2.0 == 0.0 => floor,
            _ => floor + 1.0,
        };
        rounded as u32
    }
}
