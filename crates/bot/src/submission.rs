use tracing::{info, warn};

use feedloop_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use feedloop_core::domain::feedback::{Author, FeedbackRecord, NewFeedback, Rating, UserId};
use feedloop_core::errors::ApplicationError;

use crate::context::BotContext;
use crate::menus::MY_FEEDBACK_PAGE_SIZE;
use crate::notify::{DeliveryOutcome, DeliveryStatus};

/// Result of a stored submission together with how the admin alerts went.
#[derive(Clone, Debug)]
pub struct Submitted {
    pub record: FeedbackRecord,
    pub deliveries: Vec<DeliveryOutcome>,
}

/// A user's most recent entries plus their overall count.
#[derive(Clone, Debug)]
pub struct UserFeedback {
    pub recent: Vec<FeedbackRecord>,
    pub total: u64,
}

pub struct SubmissionService<'a> {
    context: &'a BotContext,
}

impl<'a> SubmissionService<'a> {
    pub fn new(context: &'a BotContext) -> Self {
        Self { context }
    }

    /// Stores the entry, then alerts every admin. Alert failures are logged
    /// per recipient and never undo the submission.
    pub async fn submit(
        &self,
        author: Author,
        text: String,
        rating: Option<Rating>,
        audit: &AuditContext,
    ) -> Result<Submitted, ApplicationError> {
        let new = NewFeedback::new(author, text, rating)?;

        let record = match self.context.repository.create(new).await {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    event_name = "feedback.create_failed",
                    correlation_id = %audit.correlation_id,
                    user_id = audit.user_id.map(|id| id.0),
                    error = %error,
                    "failed to store feedback"
                );
                self.context.audit.emit(
                    event(
                        audit,
                        "feedback.create_failed",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        info!(
            event_name = "feedback.created",
            correlation_id = %audit.correlation_id,
            user_id = record.author.user_id.0,
            feedback_id = %record.id,
            rated = record.rating.is_some(),
            "feedback stored"
        );
        self.context.audit.emit(
            event(
                &audit.for_feedback(record.id.clone()),
                "feedback.created",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            )
            .with_metadata(
                "rating",
                record.rating.map_or_else(|| "none".to_owned(), |r| r.value().to_string()),
            ),
        );

        let deliveries =
            self.context.notifier.notify_created(&record, &audit.correlation_id).await;
        let delivered = deliveries
            .iter()
            .filter(|outcome| outcome.status == DeliveryStatus::Delivered)
            .count();
        self.context.audit.emit(
            event(
                &audit.for_feedback(record.id.clone()),
                "notify.admins.fanout_completed",
                AuditCategory::Notification,
                AuditOutcome::Success,
            )
            .with_metadata("recipients", deliveries.len().to_string())
            .with_metadata("delivered", delivered.to_string()),
        );

        Ok(Submitted { record, deliveries })
    }

    pub async fn recent_for_user(&self, user_id: UserId) -> Result<UserFeedback, ApplicationError> {
        let recent =
            self.context.repository.get_by_user(user_id, MY_FEEDBACK_PAGE_SIZE as u32).await?;
        let total = self.context.repository.count_by_user(user_id).await?;
        Ok(UserFeedback { recent, total })
    }
}

pub(crate) fn event(
    audit: &AuditContext,
    event_type: &str,
    category: AuditCategory,
    outcome: AuditOutcome,
) -> AuditEvent {
    AuditEvent::new(
        audit.user_id,
        audit.feedback_id.clone(),
        audit.correlation_id.clone(),
        event_type,
        category,
        audit.actor.clone(),
        outcome,
    )
}
