use tracing::{info, warn};

use feedloop_core::access::AdminCapability;
use feedloop_core::audit::{AuditCategory, AuditContext, AuditOutcome};
use feedloop_core::domain::feedback::{FeedbackId, FeedbackRecord, FeedbackStats, Verdict};
use feedloop_core::errors::ApplicationError;
use feedloop_db::repositories::{ALL_QUERY_LIMIT, PENDING_QUERY_LIMIT};
use feedloop_db::RepositoryError;

use crate::context::BotContext;
use crate::menus::{ALL_PAGE_SIZE, PENDING_PAGE_SIZE};
use crate::submission::event;

/// Records to present plus how many the query returned in total.
#[derive(Clone, Debug)]
pub struct Page {
    pub records: Vec<FeedbackRecord>,
    pub fetched: usize,
}

impl Page {
    fn from_fetched(mut fetched: Vec<FeedbackRecord>, page_size: usize) -> Self {
        let total = fetched.len();
        fetched.truncate(page_size);
        Self { records: fetched, fetched: total }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Admin operations. Each one takes an [`AdminCapability`], so a caller
/// must have passed the allow-list check to reach any of them.
pub struct ModerationService<'a> {
    context: &'a BotContext,
}

impl<'a> ModerationService<'a> {
    pub fn new(context: &'a BotContext) -> Self {
        Self { context }
    }

    pub async fn list_pending(&self, _admin: &AdminCapability) -> Result<Page, ApplicationError> {
        let pending = self.context.repository.get_pending(PENDING_QUERY_LIMIT).await?;
        Ok(Page::from_fetched(pending, PENDING_PAGE_SIZE))
    }

    pub async fn list_all(&self, _admin: &AdminCapability) -> Result<Page, ApplicationError> {
        let all = self.context.repository.get_all(ALL_QUERY_LIMIT).await?;
        Ok(Page::from_fetched(all, ALL_PAGE_SIZE))
    }

    pub async fn stats(&self, _admin: &AdminCapability) -> Result<FeedbackStats, ApplicationError> {
        Ok(self.context.repository.stats().await?)
    }

    pub async fn approve(
        &self,
        admin: &AdminCapability,
        target: &FeedbackId,
        comment: Option<String>,
        audit: &AuditContext,
    ) -> Result<FeedbackRecord, ApplicationError> {
        self.decide(admin, target, Verdict::Approved, comment, audit).await
    }

    pub async fn reject(
        &self,
        admin: &AdminCapability,
        target: &FeedbackId,
        comment: Option<String>,
        audit: &AuditContext,
    ) -> Result<FeedbackRecord, ApplicationError> {
        self.decide(admin, target, Verdict::Rejected, comment, audit).await
    }

    /// Confirms the target exists before an annotation is started.
    pub async fn ensure_exists(
        &self,
        _admin: &AdminCapability,
        target: &FeedbackId,
    ) -> Result<FeedbackRecord, ApplicationError> {
        self.context
            .repository
            .find_by_id(target)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(target.clone()))
    }

    /// A comment always lands as an approval.
    pub async fn annotate(
        &self,
        admin: &AdminCapability,
        target: &FeedbackId,
        comment: String,
        audit: &AuditContext,
    ) -> Result<FeedbackRecord, ApplicationError> {
        self.decide(admin, target, Verdict::Approved, Some(comment), audit).await
    }

    async fn decide(
        &self,
        admin: &AdminCapability,
        target: &FeedbackId,
        verdict: Verdict,
        comment: Option<String>,
        audit: &AuditContext,
    ) -> Result<FeedbackRecord, ApplicationError> {
        let has_comment = comment.is_some();
        let result = match verdict {
            Verdict::Approved => self.context.repository.approve(target, comment).await,
            Verdict::Rejected => self.context.repository.reject(target, comment).await,
        };
        let audit = audit.for_feedback(target.clone());
        let verdict_name = if verdict.is_approved() { "approved" } else { "rejected" };

        match result {
            Ok(record) => {
                info!(
                    event_name = "moderation.decision_recorded",
                    correlation_id = %audit.correlation_id,
                    feedback_id = %record.id,
                    admin_id = admin.admin().0,
                    verdict = verdict_name,
                    with_comment = has_comment,
                    "moderation decision recorded"
                );
                self.context.audit.emit(
                    event(
                        &audit,
                        "moderation.decision_recorded",
                        AuditCategory::Moderation,
                        AuditOutcome::Success,
                    )
                    .with_metadata("verdict", verdict_name),
                );
                self.context.notifier.notify_decision(&record, &audit.correlation_id).await;
                Ok(record)
            }
            Err(error) => {
                let outcome = match error {
                    RepositoryError::NotFound(_) => AuditOutcome::Rejected,
                    _ => AuditOutcome::Failed,
                };
                warn!(
                    event_name = "moderation.decision_failed",
                    correlation_id = %audit.correlation_id,
                    feedback_id = %target,
                    admin_id = admin.admin().0,
                    verdict = verdict_name,
                    error = %error,
                    "moderation decision not recorded"
                );
                self.context.audit.emit(
                    event(
                        &audit,
                        "moderation.decision_failed",
                        AuditCategory::Moderation,
                        outcome,
                    )
                    .with_metadata("verdict", verdict_name)
                    .with_metadata("error", error.to_string()),
                );
                Err(error.into())
            }
        }
    }
}
