use std::sync::Arc;
use std::time::Duration;

use feedloop_core::access::AdminAllowList;
use feedloop_core::audit::{AuditSink, TracingAuditSink};
use feedloop_core::config::AppConfig;
use feedloop_core::conversation::ConversationStore;
use feedloop_core::flows::{FeedbackFlow, FlowEngine};
use feedloop_db::FeedbackRepository;

use crate::notify::Notifier;
use crate::outbox::Outbox;

/// Everything a handler needs, built once at startup and shared by all
/// in-flight events.
pub struct BotContext {
    pub repository: Arc<dyn FeedbackRepository>,
    pub conversations: ConversationStore,
    pub admins: AdminAllowList,
    pub outbox: Arc<dyn Outbox>,
    pub notifier: Notifier,
    pub audit: Arc<dyn AuditSink>,
    pub flow: FlowEngine<FeedbackFlow>,
}

impl BotContext {
    pub fn new(
        repository: Arc<dyn FeedbackRepository>,
        outbox: Arc<dyn Outbox>,
        admins: AdminAllowList,
        send_timeout: Duration,
    ) -> Self {
        let notifier = Notifier::new(Arc::clone(&outbox), admins.clone(), send_timeout);
        Self {
            repository,
            conversations: ConversationStore::new(),
            admins,
            outbox,
            notifier,
            audit: Arc::new(TracingAuditSink),
            flow: FlowEngine::default(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        repository: Arc<dyn FeedbackRepository>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self::new(
            repository,
            outbox,
            AdminAllowList::from_raw(&config.admins.ids),
            Duration::from_millis(config.notifications.send_timeout_ms),
        )
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn with_conversations(mut self, conversations: ConversationStore) -> Self {
        self.conversations = conversations;
        self
    }
}
