use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

use feedloop_core::access::AdminAllowList;
use feedloop_core::domain::feedback::{FeedbackRecord, UserId};

use crate::events::ChatId;
use crate::menus::{admin_notification, OutboundMessage};
use crate::outbox::Outbox;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub recipient: UserId,
    pub status: DeliveryStatus,
}

/// Fans new-feedback alerts out to every admin. Each send runs on its own
/// task under its own timeout; one dead recipient never holds up the rest.
#[derive(Clone)]
pub struct Notifier {
    outbox: Arc<dyn Outbox>,
    admins: AdminAllowList,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(outbox: Arc<dyn Outbox>, admins: AdminAllowList, send_timeout: Duration) -> Self {
        Self { outbox, admins, send_timeout }
    }

    pub async fn notify_created(
        &self,
        record: &FeedbackRecord,
        correlation_id: &str,
    ) -> Vec<DeliveryOutcome> {
        let message = Arc::new(admin_notification(record));
        let mut deliveries = JoinSet::new();

        for recipient in self.admins.recipients() {
            let outbox = Arc::clone(&self.outbox);
            let message = Arc::clone(&message);
            let send_timeout = self.send_timeout;
            deliveries.spawn(async move {
                let status = deliver(outbox.as_ref(), recipient, &message, send_timeout).await;
                DeliveryOutcome { recipient, status }
            });
        }

        let mut outcomes = Vec::with_capacity(self.admins.len());
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(outcome) => {
                    log_outcome(&outcome, record, correlation_id);
                    outcomes.push(outcome);
                }
                Err(error) => {
                    warn!(
                        event_name = "notify.admin.task_failed",
                        correlation_id = %correlation_id,
                        feedback_id = %record.id,
                        error = %error,
                        "admin notification task did not complete"
                    );
                }
            }
        }

        outcomes.sort_by_key(|outcome| outcome.recipient);
        outcomes
    }

    /// Authors are not told about moderation decisions; the hook exists so
    /// callers have one place to extend.
    pub async fn notify_decision(&self, record: &FeedbackRecord, correlation_id: &str) {
        tracing::debug!(
            event_name = "notify.author.skipped",
            correlation_id = %correlation_id,
            feedback_id = %record.id,
            "author decision notifications are disabled"
        );
    }
}

async fn deliver(
    outbox: &dyn Outbox,
    recipient: UserId,
    message: &OutboundMessage,
    send_timeout: Duration,
) -> DeliveryStatus {
    match tokio::time::timeout(send_timeout, outbox.send(ChatId::from(recipient), message)).await
    {
        Ok(Ok(_)) => DeliveryStatus::Delivered,
        Ok(Err(error)) => DeliveryStatus::Failed(error.to_string()),
        Err(_) => DeliveryStatus::TimedOut,
    }
}

fn log_outcome(outcome: &DeliveryOutcome, record: &FeedbackRecord, correlation_id: &str) {
    match &outcome.status {
        DeliveryStatus::Delivered => info!(
            event_name = "notify.admin.delivered",
            correlation_id = %correlation_id,
            feedback_id = %record.id,
            recipient = outcome.recipient.0,
            "admin notified of new feedback"
        ),
        DeliveryStatus::Failed(error) => warn!(
            event_name = "notify.admin.failed",
            correlation_id = %correlation_id,
            feedback_id = %record.id,
            recipient = outcome.recipient.0,
            error = %error,
            "admin notification failed"
        ),
        DeliveryStatus::TimedOut => warn!(
            event_name = "notify.admin.timed_out",
            correlation_id = %correlation_id,
            feedback_id = %record.id,
            recipient = outcome.recipient.0,
            "admin notification timed out"
        ),
    }
}
