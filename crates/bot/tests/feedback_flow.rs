use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use feedloop_bot::events::{
    ActionRef, ChatId, EventSource, HandlerResult, InboundEnvelope, InboundEvent, MenuCommand,
    MessageRef, ModerationAction,
};
use feedloop_bot::menus::NOT_PERMITTED_TOAST;
use feedloop_bot::runner::NoopUpdateSource;
use feedloop_bot::{BotContext, PollingRunner, RecordingOutbox, RetryPolicy, Router};
use feedloop_core::access::AdminAllowList;
use feedloop_core::audit::{AuditOutcome, InMemoryAuditSink};
use feedloop_core::domain::feedback::{
    Author, FeedbackId, FeedbackRecord, FeedbackStats, NewFeedback, Rating, UserId,
};
use feedloop_core::flows::{ConversationState, RatingChoice};
use feedloop_db::repositories::{ALL_QUERY_LIMIT, PENDING_QUERY_LIMIT};
use feedloop_db::{
    connect_with_settings, migrations, FeedbackRepository, InMemoryFeedbackRepository,
    RepositoryError, SqlFeedbackRepository,
};

const ADMIN: i64 = 100;
const SECOND_ADMIN: i64 = 200;

struct Harness {
    router: Router,
    outbox: RecordingOutbox,
    repository: Arc<dyn FeedbackRepository>,
    audit: InMemoryAuditSink,
    next_update: AtomicUsize,
}

impl Harness {
    fn new(repository: Arc<dyn FeedbackRepository>) -> Self {
        Self::with_outbox(repository, RecordingOutbox::new(), Duration::from_secs(1))
    }

    fn with_outbox(
        repository: Arc<dyn FeedbackRepository>,
        outbox: RecordingOutbox,
        send_timeout: Duration,
    ) -> Self {
        let audit = InMemoryAuditSink::default();
        let context = BotContext::new(
            Arc::clone(&repository),
            Arc::new(outbox.clone()),
            AdminAllowList::from_raw(&[ADMIN, SECOND_ADMIN]),
            send_timeout,
        )
        .with_audit_sink(Arc::new(audit.clone()));
        Self {
            router: Router::new(Arc::new(context)),
            outbox,
            repository,
            audit,
            next_update: AtomicUsize::new(1),
        }
    }

    fn envelope(&self, event: InboundEvent) -> InboundEnvelope {
        let id = self.next_update.fetch_add(1, Ordering::SeqCst);
        InboundEnvelope::new(format!("upd-{id}"), event)
    }

    async fn send(&self, event: InboundEvent) -> HandlerResult {
        self.router.handle(self.envelope(event)).await.expect("event handled")
    }

    async fn state(&self, user: i64) -> ConversationState {
        self.router.context().conversations.get(UserId(user)).await
    }

    async fn submit(&self, user: i64, text: &str, choice: RatingChoice) {
        self.send(start(user)).await;
        self.send(text_from(user, text)).await;
        self.send(choose(user, choice)).await;
    }
}

fn source(user: i64) -> EventSource {
    EventSource::new(UserId(user), format!("User {user}")).with_username(format!("user{user}"))
}

fn start(user: i64) -> InboundEvent {
    InboundEvent::StartFeedback { source: source(user) }
}

fn text_from(user: i64, text: &str) -> InboundEvent {
    InboundEvent::Text { source: source(user), text: text.to_owned() }
}

fn choose(user: i64, value: RatingChoice) -> InboundEvent {
    InboundEvent::Choice {
        source: source(user),
        value,
        message_ref: Some(MessageRef { chat_id: ChatId(user), message_id: 10 }),
        action_ref: Some(ActionRef(format!("cb-rating-{user}"))),
    }
}

fn command(user: i64, command: MenuCommand) -> InboundEvent {
    InboundEvent::Command { source: source(user), command }
}

fn act(user: i64, target: &FeedbackId, action: ModerationAction) -> InboundEvent {
    InboundEvent::Action {
        source: source(user),
        target: target.clone(),
        action,
        message_ref: Some(MessageRef { chat_id: ChatId(user), message_id: 77 }),
        action_ref: Some(ActionRef(format!("cb-{}-{target}", action.name()))),
    }
}

fn stars(value: u8) -> RatingChoice {
    RatingChoice::Stars(Rating::new(value).expect("valid rating"))
}

async fn sqlite_repository() -> Arc<dyn FeedbackRepository> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    Arc::new(SqlFeedbackRepository::new(pool))
}

async fn seed(repository: &dyn FeedbackRepository, count: usize) -> Vec<FeedbackId> {
    let mut ids = Vec::with_capacity(count);
    for index in 0..count {
        let new = NewFeedback::new(Author::new(UserId(1), "Ada"), format!("seeded {index}"), None)
            .expect("valid feedback");
        ids.push(repository.create(new).await.expect("seed").id);
    }
    ids
}

/// Repository whose first `failures` writes fail as if the store were down.
struct FlakyRepository {
    inner: InMemoryFeedbackRepository,
    failures: AtomicUsize,
}

impl FlakyRepository {
    fn failing(times: usize) -> Self {
        Self { inner: InMemoryFeedbackRepository::new(), failures: AtomicUsize::new(times) }
    }

    fn trip(&self) -> Result<(), RepositoryError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Unavailable("database is locked".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedbackRepository for FlakyRepository {
    async fn create(&self, feedback: NewFeedback) -> Result<FeedbackRecord, RepositoryError> {
        self.trip()?;
        self.inner.create(feedback).await
    }

    async fn find_by_id(&self, id: &FeedbackId) -> Result<Option<FeedbackRecord>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn get_pending(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        self.inner.get_pending(limit).await
    }

    async fn get_all(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        self.inner.get_all(limit).await
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        self.inner.get_by_user(user_id, limit).await
    }

    async fn count_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        self.inner.count_by_user(user_id).await
    }

    async fn approve(
        &self,
        id: &FeedbackId,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError> {
        self.trip()?;
        self.inner.approve(id, comment).await
    }

    async fn reject(
        &self,
        id: &FeedbackId,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError> {
        self.trip()?;
        self.inner.reject(id, comment).await
    }

    async fn stats(&self) -> Result<FeedbackStats, RepositoryError> {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn full_submission_stores_one_record_and_alerts_every_admin() {
    let harness = Harness::new(sqlite_repository().await);

    assert_eq!(harness.send(start(1)).await, HandlerResult::Responded);
    assert_eq!(harness.state(1).await, ConversationState::AwaitingText);
    harness.send(text_from(1, "Great service")).await;
    assert_eq!(
        harness.state(1).await,
        ConversationState::AwaitingRating { text: "Great service".to_owned() }
    );
    harness.send(choose(1, stars(5))).await;

    let records = harness.repository.get_all(ALL_QUERY_LIMIT).await.expect("records");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.text, "Great service");
    assert_eq!(record.rating.map(Rating::value), Some(5));
    assert_eq!(record.author.user_id, UserId(1));
    assert_eq!(record.author.username.as_deref(), Some("user1"));
    assert!(!record.is_moderated());
    assert_eq!(record.is_approved(), None);

    for admin in [ADMIN, SECOND_ADMIN] {
        let alerts = harness.outbox.sent_to(ChatId(admin)).await;
        assert_eq!(alerts.len(), 1, "admin {admin} gets exactly one alert");
        assert!(alerts[0].text.contains("New feedback"));
        assert!(alerts[0].text.contains("Great service"));
    }

    let to_user = harness.outbox.sent_to(ChatId(1)).await;
    assert!(to_user.last().expect("confirmation").text.contains("Thank you"));
    assert_eq!(harness.outbox.edits().await.len(), 1, "rating buttons removed");
    assert_eq!(harness.state(1).await, ConversationState::Idle);
}

#[tokio::test]
async fn skipping_the_rating_stores_no_rating() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));

    harness.submit(1, "No stars from me", RatingChoice::Skip).await;

    let records = harness.repository.get_all(ALL_QUERY_LIMIT).await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rating, None);
}

#[tokio::test]
async fn blank_text_reprompts_and_keeps_waiting() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    harness.send(start(1)).await;

    assert_eq!(harness.send(text_from(1, "   ")).await, HandlerResult::Responded);

    assert_eq!(harness.state(1).await, ConversationState::AwaitingText);
    let last = harness.outbox.sent_to(ChatId(1)).await.pop().expect("reprompt");
    assert!(last.text.contains("empty"));
}

#[tokio::test]
async fn stray_events_are_ignored_without_replies() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));

    assert_eq!(harness.send(text_from(1, "hello?")).await, HandlerResult::Ignored);
    assert_eq!(harness.send(choose(1, stars(3))).await, HandlerResult::Ignored);

    assert!(harness.outbox.sent().await.is_empty());
    assert!(harness.repository.get_all(ALL_QUERY_LIMIT).await.expect("records").is_empty());
}

#[tokio::test]
async fn approve_then_reject_leaves_the_latest_decision() {
    let harness = Harness::new(sqlite_repository().await);
    let ids = seed(harness.repository.as_ref(), 1).await;

    let approved = harness.send(act(ADMIN, &ids[0], ModerationAction::Approve)).await;
    assert_eq!(approved, HandlerResult::Processed);
    let record = harness.repository.find_by_id(&ids[0]).await.expect("find").expect("exists");
    assert!(record.is_moderated());
    assert_eq!(record.is_approved(), Some(true));

    harness.send(act(SECOND_ADMIN, &ids[0], ModerationAction::Reject)).await;
    let record = harness.repository.find_by_id(&ids[0]).await.expect("find").expect("exists");
    assert!(record.is_moderated());
    assert_eq!(record.is_approved(), Some(false));
    assert!(record.moderation.moderated_at().is_some());

    assert_eq!(harness.outbox.edits().await.len(), 2, "moderation buttons removed each time");
    let toasts: Vec<_> = harness
        .outbox
        .acknowledgements()
        .await
        .into_iter()
        .filter_map(|ack| ack.text)
        .collect();
    assert_eq!(toasts.len(), 2);
}

#[tokio::test]
async fn moderating_a_missing_record_reports_not_found() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    let missing = FeedbackId("does-not-exist".to_owned());

    assert_eq!(
        harness.send(act(ADMIN, &missing, ModerationAction::Approve)).await,
        HandlerResult::Responded
    );

    let reply = harness.outbox.sent_to(ChatId(ADMIN)).await.pop().expect("error reply");
    assert!(reply.text.contains("no longer exists"));
}

#[tokio::test]
async fn non_admins_are_refused_without_any_mutation() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    let ids = seed(harness.repository.as_ref(), 2).await;
    let outsider = 7;

    for action in [ModerationAction::Approve, ModerationAction::Reject, ModerationAction::Annotate]
    {
        assert_eq!(harness.send(act(outsider, &ids[0], action)).await, HandlerResult::Refused);
    }
    for menu in [
        MenuCommand::PendingFeedback,
        MenuCommand::AllFeedback,
        MenuCommand::Stats,
        MenuCommand::AdminPanel,
    ] {
        assert_eq!(harness.send(command(outsider, menu)).await, HandlerResult::Refused);
    }

    let pending = harness.repository.get_pending(PENDING_QUERY_LIMIT).await.expect("pending");
    assert_eq!(pending.len(), 2);
    assert!(harness.outbox.sent_to(ChatId(outsider)).await.is_empty());
    assert!(harness.outbox.edits().await.is_empty());
    assert_eq!(harness.state(outsider).await, ConversationState::Idle);

    let acks = harness.outbox.acknowledgements().await;
    assert_eq!(acks.len(), 3);
    assert!(acks.iter().all(|ack| ack.alert && ack.text.as_deref() == Some(NOT_PERMITTED_TOAST)));

    let denials: Vec<_> = harness
        .audit
        .events()
        .into_iter()
        .filter(|event| event.event_type == "moderation.access_denied")
        .collect();
    assert_eq!(denials.len(), 7);
    assert!(denials.iter().all(|event| event.outcome == AuditOutcome::Rejected));
}

#[tokio::test]
async fn stats_report_rounded_approval_rate() {
    let harness = Harness::new(sqlite_repository().await);
    let ids = seed(harness.repository.as_ref(), 5).await;
    harness.send(act(ADMIN, &ids[0], ModerationAction::Approve)).await;
    harness.send(act(ADMIN, &ids[1], ModerationAction::Reject)).await;

    harness.send(command(ADMIN, MenuCommand::Stats)).await;

    let reply = harness.outbox.sent_to(ChatId(ADMIN)).await.pop().expect("stats reply");
    assert!(reply.text.contains("Total: 5"));
    assert!(reply.text.contains("Under review: 3"));
    assert!(reply.text.contains("Approval rate: 50%"));
}

#[tokio::test]
async fn pending_list_shows_ten_with_moderation_buttons() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    let ids = seed(harness.repository.as_ref(), 12).await;

    harness.send(command(ADMIN, MenuCommand::PendingFeedback)).await;

    let sent = harness.outbox.sent_to(ChatId(ADMIN)).await;
    let items: Vec<_> = sent.iter().filter(|message| message.choices.is_some()).collect();
    assert_eq!(items.len(), 10);
    let newest = &ids[11];
    assert_eq!(
        items[0].choices.as_ref().expect("buttons").callback_data(),
        vec![
            format!("approve_{newest}"),
            format!("reject_{newest}"),
            format!("comment_{newest}"),
        ]
    );
    assert!(sent.last().expect("overflow note").text.contains("10 of 12"));
}

#[tokio::test]
async fn one_undeliverable_pending_item_does_not_hide_the_rest() {
    let outbox = RecordingOutbox::new().with_rejected_text("UNDELIVERABLE");
    let harness = Harness::with_outbox(
        Arc::new(InMemoryFeedbackRepository::new()),
        outbox,
        Duration::from_secs(1),
    );
    for index in 0..5 {
        let text =
            if index == 3 { "UNDELIVERABLE entry".to_owned() } else { format!("entry {index}") };
        let new = NewFeedback::new(Author::new(UserId(1), "Ada"), text, None).expect("valid");
        harness.repository.create(new).await.expect("seed");
    }

    let result = harness
        .router
        .handle(harness.envelope(command(ADMIN, MenuCommand::PendingFeedback)))
        .await
        .expect("listing survives a rejected item");

    assert_eq!(result, HandlerResult::Responded);
    let shown: Vec<_> = harness
        .outbox
        .sent_to(ChatId(ADMIN))
        .await
        .into_iter()
        .filter(|message| message.choices.is_some())
        .collect();
    assert_eq!(shown.len(), 4);
    assert!(shown[0].text.contains("entry 4"));
    assert!(shown[3].text.contains("entry 0"));
}

#[tokio::test]
async fn empty_queue_says_everything_is_processed() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));

    harness.send(command(ADMIN, MenuCommand::PendingFeedback)).await;

    let sent = harness.outbox.sent_to(ChatId(ADMIN)).await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("processed"));
}

#[tokio::test]
async fn admin_comment_applies_the_next_text_as_an_approval() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    let ids = seed(harness.repository.as_ref(), 1).await;

    harness.send(act(ADMIN, &ids[0], ModerationAction::Annotate)).await;
    assert_eq!(
        harness.state(ADMIN).await,
        ConversationState::AwaitingAdminComment { target: ids[0].clone() }
    );

    harness.send(text_from(ADMIN, "Thanks, fixed")).await;

    let record = harness.repository.find_by_id(&ids[0]).await.expect("find").expect("exists");
    assert_eq!(record.is_approved(), Some(true));
    assert_eq!(record.moderation.comment(), Some("Thanks, fixed"));
    assert_eq!(harness.state(ADMIN).await, ConversationState::Idle);
    let reply = harness.outbox.sent_to(ChatId(ADMIN)).await.pop().expect("confirmation");
    assert!(reply.text.contains("Comment added"));
}

#[tokio::test]
async fn comment_on_missing_record_never_enters_the_comment_state() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    let missing = FeedbackId("gone".to_owned());

    harness.send(act(ADMIN, &missing, ModerationAction::Annotate)).await;

    assert_eq!(harness.state(ADMIN).await, ConversationState::Idle);
}

#[tokio::test]
async fn storage_failure_keeps_the_rating_step_for_a_retry() {
    let harness = Harness::new(Arc::new(FlakyRepository::failing(1)));
    harness.send(start(1)).await;
    harness.send(text_from(1, "Slow delivery")).await;

    assert_eq!(harness.send(choose(1, stars(2))).await, HandlerResult::Responded);
    assert_eq!(
        harness.state(1).await,
        ConversationState::AwaitingRating { text: "Slow delivery".to_owned() }
    );
    let apology = harness.outbox.sent_to(ChatId(1)).await.pop().expect("error reply");
    assert!(apology.text.contains("try again"));
    assert!(harness.outbox.sent_to(ChatId(ADMIN)).await.is_empty());

    harness.send(choose(1, stars(2))).await;

    let records = harness.repository.get_all(ALL_QUERY_LIMIT).await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text, "Slow delivery");
    assert_eq!(harness.state(1).await, ConversationState::Idle);
    assert_eq!(harness.outbox.sent_to(ChatId(ADMIN)).await.len(), 1);
}

#[tokio::test]
async fn failed_comment_keeps_the_comment_step() {
    let repository = Arc::new(FlakyRepository::failing(0));
    let harness = Harness::new(Arc::clone(&repository) as Arc<dyn FeedbackRepository>);
    let ids = seed(harness.repository.as_ref(), 1).await;
    harness.send(act(ADMIN, &ids[0], ModerationAction::Annotate)).await;

    repository.failures.store(1, Ordering::SeqCst);
    harness.send(text_from(ADMIN, "first try")).await;
    assert_eq!(
        harness.state(ADMIN).await,
        ConversationState::AwaitingAdminComment { target: ids[0].clone() }
    );

    harness.send(text_from(ADMIN, "second try")).await;
    let record = harness.repository.find_by_id(&ids[0]).await.expect("find").expect("exists");
    assert_eq!(record.moderation.comment(), Some("second try"));
    assert_eq!(harness.state(ADMIN).await, ConversationState::Idle);
}

#[tokio::test]
async fn interleaved_users_never_mix_their_drafts() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    let runner = PollingRunner::new(
        Arc::new(NoopUpdateSource),
        harness.router.clone(),
        RetryPolicy::default(),
    );

    let batch = vec![
        harness.envelope(start(1)),
        harness.envelope(start(2)),
        harness.envelope(text_from(1, "alpha")),
        harness.envelope(text_from(2, "beta")),
        harness.envelope(choose(2, stars(2))),
        harness.envelope(choose(1, stars(1))),
    ];
    let report = runner.dispatch(batch).await;
    assert_eq!((report.received, report.conversations, report.failed), (6, 2, 0));

    for (user, text, rating) in [(1, "alpha", 1), (2, "beta", 2)] {
        let mine = harness.repository.get_by_user(UserId(user), 5).await.expect("by user");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].text, text);
        assert_eq!(mine[0].rating.map(Rating::value), Some(rating));
    }
}

#[tokio::test]
async fn concurrent_submissions_from_many_users_all_land() {
    let harness = Arc::new(Harness::new(Arc::new(InMemoryFeedbackRepository::new())));

    let tasks: Vec<_> = (1..=8)
        .map(|user| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness.submit(user, &format!("draft of user {user}"), stars(4)).await;
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("submission task");
    }

    let records = harness.repository.get_all(ALL_QUERY_LIMIT).await.expect("records");
    assert_eq!(records.len(), 8);
    for record in records {
        assert_eq!(record.text, format!("draft of user {}", record.author.user_id));
    }
}

#[tokio::test]
async fn slow_admin_does_not_hold_up_the_submission() {
    let outbox = RecordingOutbox::new().with_delay(ChatId(ADMIN), Duration::from_secs(5));
    let harness = Harness::with_outbox(
        Arc::new(InMemoryFeedbackRepository::new()),
        outbox,
        Duration::from_millis(100),
    );

    let started = Instant::now();
    harness.submit(1, "Quick one", stars(3)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(harness.outbox.sent_to(ChatId(ADMIN)).await.is_empty());
    assert_eq!(harness.outbox.sent_to(ChatId(SECOND_ADMIN)).await.len(), 1);
    assert_eq!(harness.state(1).await, ConversationState::Idle);
}

#[tokio::test]
async fn my_feedback_lists_own_entries_with_count() {
    let harness = Harness::new(Arc::new(InMemoryFeedbackRepository::new()));
    harness.submit(3, "first", stars(5)).await;
    harness.submit(3, "second", RatingChoice::Skip).await;
    harness.submit(4, "someone else", stars(1)).await;

    harness.send(command(3, MenuCommand::MyFeedback)).await;

    let reply = harness.outbox.sent_to(ChatId(3)).await.pop().expect("listing");
    assert!(reply.text.contains("(2)"));
    assert!(reply.text.contains("second"));
    assert!(!reply.text.contains("someone else"));
}
