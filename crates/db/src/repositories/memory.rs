use tokio::sync::RwLock;
use uuid::Uuid;

use feedloop_core::domain::feedback::{
    FeedbackId, FeedbackRecord, FeedbackStats, NewFeedback, UserId, Verdict,
};

use super::{stored_now, FeedbackRepository, RepositoryError};

/// Records kept in insertion order, so iterating in reverse yields newest
/// first.
#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl InMemoryFeedbackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn newest_matching<P>(&self, limit: u32, predicate: P) -> Vec<FeedbackRecord>
    where
        P: Fn(&FeedbackRecord) -> bool,
    {
        let records = self.records.read().await;
        records.iter().rev().filter(|r| predicate(*r)).take(limit as usize).cloned().collect()
    }

    async fn decide(
        &self,
        id: &FeedbackId,
        verdict: Verdict,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|record| &record.id == id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        record.moderate(verdict, comment, stored_now());
        Ok(record.clone())
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn create(&self, feedback: NewFeedback) -> Result<FeedbackRecord, RepositoryError> {
        let record =
            FeedbackRecord::from_new(FeedbackId(Uuid::new_v4().to_string()), feedback, stored_now());
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &FeedbackId) -> Result<Option<FeedbackRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|record| &record.id == id).cloned())
    }

    async fn get_pending(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        Ok(self.newest_matching(limit, |record| !record.is_moderated()).await)
    }

    async fn get_all(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        Ok(self.newest_matching(limit, |_| true).await)
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        Ok(self.newest_matching(limit, |record| record.author.user_id == user_id).await)
    }

    async fn count_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| record.author.user_id == user_id).count() as u64)
    }

    async fn approve(
        &self,
        id: &FeedbackId,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError> {
        self.decide(id, Verdict::Approved, comment).await
    }

    async fn reject(
        &self,
        id: &FeedbackId,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError> {
        self.decide(id, Verdict::Rejected, comment).await
    }

    async fn stats(&self) -> Result<FeedbackStats, RepositoryError> {
        let records = self.records.read().await;
        let count = |predicate: &dyn Fn(&FeedbackRecord) -> bool| {
            records.iter().filter(|record| predicate(*record)).count() as u64
        };

        Ok(FeedbackStats {
            total: records.len() as u64,
            moderated: count(&|r| r.is_moderated()),
            approved: count(&|r| r.is_approved() == Some(true)),
            rejected: count(&|r| r.is_approved() == Some(false)),
            pending: count(&|r| !r.is_moderated()),
        })
    }
}
