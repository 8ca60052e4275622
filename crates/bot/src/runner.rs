use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use feedloop_core::domain::feedback::UserId;

use crate::events::{HandlerResult, InboundEnvelope};
use crate::router::Router;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("update poll failed: {0}")]
    Poll(String),
    #[error("update payload could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Inbound side of the messaging platform. Each call returns the next batch
/// of events in arrival order; an empty batch means nothing new arrived.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn next_batch(&self) -> Result<Vec<InboundEnvelope>, TransportError>;
}

#[derive(Default)]
pub struct NoopUpdateSource;

#[async_trait]
impl UpdateSource for NoopUpdateSource {
    async fn next_batch(&self) -> Result<Vec<InboundEnvelope>, TransportError> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub conversations: usize,
    pub failed: usize,
}

/// Polls the update source and hands events to the router. Events from one
/// user are handled in order on a single task; different users run
/// concurrently. A batch finishes before the next poll starts.
pub struct PollingRunner {
    source: Arc<dyn UpdateSource>,
    router: Router,
    retry_policy: RetryPolicy,
}

impl PollingRunner {
    pub fn new(source: Arc<dyn UpdateSource>, router: Router, retry_policy: RetryPolicy) -> Self {
        Self { source, router, retry_policy }
    }

    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut consecutive_failures: u32 = 0;
        info!(event_name = "system.runner.started", "update polling started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(event_name = "system.runner.stopped", "update polling stopped");
                    return Ok(());
                }
                polled = self.source.next_batch() => match polled {
                    Ok(batch) => {
                        consecutive_failures = 0;
                        self.dispatch(batch).await;
                    }
                    Err(error) => {
                        let delay = self.retry_policy.backoff(consecutive_failures);
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        warn!(
                            event_name = "ingress.bot.poll_failed",
                            attempt = consecutive_failures,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %error,
                            "update poll failed; backing off"
                        );
                        tokio::select! {
                            _ = &mut shutdown => {
                                info!(event_name = "system.runner.stopped", "update polling stopped");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }
    }

    /// Fetches and handles a single batch.
    pub async fn poll_once(&self) -> Result<BatchReport, TransportError> {
        let batch = self.source.next_batch().await?;
        Ok(self.dispatch(batch).await)
    }

    pub async fn dispatch(&self, batch: Vec<InboundEnvelope>) -> BatchReport {
        let received = batch.len();
        let groups = group_by_conversation(batch);
        let conversations = groups.len();
        let mut tasks = JoinSet::new();

        for group in groups {
            let router = self.router.clone();
            tasks.spawn(async move {
                let mut failed = 0;
                for envelope in group {
                    if handle_one(&router, envelope).await.is_none() {
                        failed += 1;
                    }
                }
                failed
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(count) => failed += count,
                Err(error) => {
                    failed += 1;
                    warn!(
                        event_name = "router.task_failed",
                        error = %error,
                        "conversation task did not complete"
                    );
                }
            }
        }

        if received > 0 {
            debug!(
                event_name = "ingress.bot.batch_dispatched",
                received,
                conversations,
                failed,
                "update batch dispatched"
            );
        }
        BatchReport { received, conversations, failed }
    }
}

async fn handle_one(router: &Router, envelope: InboundEnvelope) -> Option<HandlerResult> {
    let correlation_id = envelope.correlation_id.clone();
    info!(
        event_name = "ingress.bot.update_received",
        correlation_id = %correlation_id,
        event_kind = envelope.event.kind(),
        user_id = envelope.event.user_id().map(|id| id.0),
        "received update"
    );

    match router.handle(envelope).await {
        Ok(result) => Some(result),
        Err(error) => {
            warn!(
                event_name = "router.event_failed",
                correlation_id = %correlation_id,
                error = %error,
                "event handling failed; continuing"
            );
            None
        }
    }
}

/// Splits a batch into per-user queues, keeping arrival order inside each
/// queue and ordering queues by first appearance.
fn group_by_conversation(batch: Vec<InboundEnvelope>) -> Vec<Vec<InboundEnvelope>> {
    let mut index: HashMap<UserId, usize> = HashMap::new();
    let mut groups: Vec<Vec<InboundEnvelope>> = Vec::new();

    for envelope in batch {
        match envelope.event.user_id() {
            Some(user_id) => {
                let position = *index.entry(user_id).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[position].push(envelope);
            }
            None => groups.push(vec![envelope]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use feedloop_core::access::AdminAllowList;
    use feedloop_core::domain::feedback::UserId;
    use feedloop_db::InMemoryFeedbackRepository;

    use super::{
        group_by_conversation, PollingRunner, RetryPolicy, TransportError, UpdateSource,
    };
    use crate::context::BotContext;
    use crate::events::{EventSource, InboundEnvelope, InboundEvent};
    use crate::outbox::RecordingOutbox;
    use crate::router::Router;

    #[derive(Default)]
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<InboundEnvelope>, TransportError>>>,
        polls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn with_script(batches: Vec<Result<Vec<InboundEnvelope>, TransportError>>) -> Self {
            Self { batches: Mutex::new(batches.into()), polls: Mutex::new(0) }
        }

        async fn polls(&self) -> usize {
            *self.polls.lock().await
        }
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn next_batch(&self) -> Result<Vec<InboundEnvelope>, TransportError> {
            *self.polls.lock().await += 1;
            let next = self.batches.lock().await.pop_front();
            match next {
                Some(batch) => batch,
                None => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn envelope(id: &str, user: i64, event: fn(EventSource) -> InboundEvent) -> InboundEnvelope {
        InboundEnvelope::new(id, event(EventSource::new(UserId(user), "User")))
    }

    fn start(source: EventSource) -> InboundEvent {
        InboundEvent::StartFeedback { source }
    }

    fn router() -> (Router, RecordingOutbox) {
        let outbox = RecordingOutbox::new();
        let context = BotContext::new(
            Arc::new(InMemoryFeedbackRepository::new()),
            Arc::new(outbox.clone()),
            AdminAllowList::default(),
            Duration::from_secs(1),
        );
        (Router::new(Arc::new(context)), outbox)
    }

    #[test]
    fn batches_are_grouped_per_user_in_arrival_order() {
        let batch = vec![
            envelope("u1", 1, start),
            envelope("u2", 2, start),
            envelope("u3", 1, start),
            InboundEnvelope::new(
                "u4",
                InboundEvent::Unsupported { source: None, kind: "poll".to_owned() },
            ),
        ];

        let groups = group_by_conversation(batch);
        let ids: Vec<Vec<&str>> = groups
            .iter()
            .map(|group| group.iter().map(|envelope| envelope.correlation_id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["u1", "u3"], vec!["u2"], vec!["u4"]]);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy { base_delay_ms: 100, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn poll_once_dispatches_every_event() {
        let (router, outbox) = router();
        let source = Arc::new(ScriptedSource::with_script(vec![Ok(vec![
            envelope("u1", 1, start),
            envelope("u2", 2, start),
        ])]));
        let runner = PollingRunner::new(source, router, RetryPolicy::default());

        let report = runner.poll_once().await.expect("poll");

        assert_eq!((report.received, report.conversations, report.failed), (2, 2, 0));
        assert_eq!(outbox.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn poll_failures_back_off_and_recover() {
        let (router, outbox) = router();
        let source = Arc::new(ScriptedSource::with_script(vec![
            Err(TransportError::Poll("network down".to_owned())),
            Ok(vec![envelope("u1", 1, start)]),
        ]));
        let runner = PollingRunner::new(
            source.clone(),
            router,
            RetryPolicy { base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .expect("runner stops cleanly");

        assert!(source.polls().await >= 2);
        assert_eq!(outbox.sent().await.len(), 1);
    }
}
