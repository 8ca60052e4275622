use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;

use feedloop_core::domain::feedback::{
    FeedbackId, FeedbackRecord, FeedbackStats, NewFeedback, UserId,
};
use feedloop_core::errors::ApplicationError;

pub mod feedback;
pub mod memory;

pub use feedback::SqlFeedbackRepository;
pub use memory::InMemoryFeedbackRepository;

/// Upper bound applied by callers listing the moderation queue.
pub const PENDING_QUERY_LIMIT: u32 = 100;
/// Upper bound applied by callers listing all feedback.
pub const ALL_QUERY_LIMIT: u32 = 20;

/// Current time at the microsecond precision the SQL store persists, so a
/// returned record matches what a later read decodes.
pub(crate) fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("feedback `{0}` was not found")]
    NotFound(FeedbackId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Durable feedback storage. Every method touches at most one row for
/// writes; listing methods return newest records first.
#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Assigns an id and creation timestamp and stores the record unmoderated.
    async fn create(&self, feedback: NewFeedback) -> Result<FeedbackRecord, RepositoryError>;

    async fn find_by_id(&self, id: &FeedbackId) -> Result<Option<FeedbackRecord>, RepositoryError>;

    async fn get_pending(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError>;

    async fn get_all(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError>;

    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError>;

    async fn count_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    /// Marks the record approved. `None` keeps any existing comment.
    async fn approve(
        &self,
        id: &FeedbackId,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError>;

    /// Marks the record rejected. `None` keeps any existing comment.
    async fn reject(
        &self,
        id: &FeedbackId,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError>;

    async fn stats(&self) -> Result<FeedbackStats, RepositoryError>;
}
