use serde::Serialize;

use feedloop_core::domain::feedback::{FeedbackRecord, FeedbackStats, FeedbackStatus};
use feedloop_core::flows::RatingChoice;

use crate::commands::{
    CallbackData, ALL_FEEDBACK_LABEL, HELP_LABEL, LEAVE_FEEDBACK_LABEL, MAIN_MENU_LABEL,
    MY_FEEDBACK_LABEL, NEW_FEEDBACK_LABEL, STATS_LABEL,
};
use crate::events::ModerationAction;

/// Number of pending records shown per "new feedback" request.
pub const PENDING_PAGE_SIZE: usize = 10;
/// Number of records shown per "all feedback" request.
pub const ALL_PAGE_SIZE: usize = 5;
/// Entries listed in "my feedback".
pub const MY_FEEDBACK_PAGE_SIZE: usize = 5;

const ALL_TEXT_PREVIEW_CHARS: usize = 200;
const MY_TEXT_PREVIEW_CHARS: usize = 50;
/// Feedback text echoed to admins is cut here so the whole message stays
/// under the Bot API's 4096 character limit.
const ADMIN_TEXT_MAX_CHARS: usize = 3_500;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChoiceButton {
    pub label: String,
    pub data: String,
}

impl ChoiceButton {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self { label: label.into(), data: data.into() }
    }
}

/// Buttons attached to a message: inline buttons that produce callbacks, or
/// a persistent menu whose labels come back as plain text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum ChoiceSet {
    Inline(Vec<Vec<ChoiceButton>>),
    Menu(Vec<Vec<String>>),
}

impl ChoiceSet {
    pub fn callback_data(&self) -> Vec<&str> {
        match self {
            Self::Inline(rows) => {
                rows.iter().flatten().map(|button| button.data.as_str()).collect()
            }
            Self::Menu(_) => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    pub choices: Option<ChoiceSet>,
}

impl OutboundMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), choices: None }
    }
}

pub struct MessageBuilder {
    lines: Vec<String>,
    choices: Option<ChoiceSet>,
}

impl MessageBuilder {
    pub fn new(first_line: impl Into<String>) -> Self {
        Self { lines: vec![first_line.into()], choices: None }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn inline<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut InlineBuilder),
    {
        let mut builder = InlineBuilder::default();
        build(&mut builder);
        self.choices = Some(ChoiceSet::Inline(builder.rows));
        self
    }

    pub fn menu(mut self, menu: ChoiceSet) -> Self {
        self.choices = Some(menu);
        self
    }

    pub fn build(self) -> OutboundMessage {
        OutboundMessage { text: self.lines.join("\n"), choices: self.choices }
    }
}

#[derive(Default)]
pub struct InlineBuilder {
    rows: Vec<Vec<ChoiceButton>>,
}

impl InlineBuilder {
    pub fn row(&mut self, buttons: impl IntoIterator<Item = ChoiceButton>) -> &mut Self {
        self.rows.push(buttons.into_iter().collect());
        self
    }
}

/// Escapes text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn preview(text: &str, max_chars: usize) -> (String, bool) {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    let truncated = chars.next().is_some();
    (head, truncated)
}

fn admin_text(record: &FeedbackRecord) -> String {
    let (head, truncated) = preview(&record.text, ADMIN_TEXT_MAX_CHARS);
    let ellipsis = if truncated { "..." } else { "" };
    format!("{}{ellipsis}", escape_html(&head))
}

fn rating_label(record: &FeedbackRecord) -> String {
    match record.rating {
        Some(rating) => format!("⭐️ {}/5", rating.value()),
        None => "No rating".to_owned(),
    }
}

fn star_bar(record: &FeedbackRecord) -> String {
    match record.rating {
        Some(rating) => {
            let stars = usize::from(rating.value());
            format!("{}{} ({stars})", "⭐️".repeat(stars), "-".repeat(5 - stars))
        }
        None => "(none)".to_owned(),
    }
}

fn author_line(record: &FeedbackRecord) -> String {
    let username = record.author.username.as_deref().unwrap_or("none");
    format!("@{} / {}", escape_html(username), escape_html(&record.author.display_name))
}

pub fn main_menu() -> ChoiceSet {
    ChoiceSet::Menu(vec![
        vec![LEAVE_FEEDBACK_LABEL.to_owned(), MY_FEEDBACK_LABEL.to_owned()],
        vec![HELP_LABEL.to_owned()],
    ])
}

pub fn admin_menu() -> ChoiceSet {
    ChoiceSet::Menu(vec![
        vec![NEW_FEEDBACK_LABEL.to_owned(), STATS_LABEL.to_owned()],
        vec![ALL_FEEDBACK_LABEL.to_owned(), MAIN_MENU_LABEL.to_owned()],
    ])
}

pub fn rating_choices() -> ChoiceSet {
    let button = |choice: RatingChoice| {
        let label = match choice {
            RatingChoice::Stars(rating) => format!("⭐️ {}", rating.value()),
            RatingChoice::Skip => "❌ Skip rating".to_owned(),
        };
        ChoiceButton::new(label, CallbackData::Rating(choice).encode())
    };
    let all = RatingChoice::all();
    ChoiceSet::Inline(vec![
        all[0..3].iter().copied().map(button).collect(),
        all[3..5].iter().copied().map(button).collect(),
        all[5..].iter().copied().map(button).collect(),
    ])
}

pub fn moderation_choices(record: &FeedbackRecord) -> ChoiceSet {
    let button = |label: &str, action: ModerationAction| {
        ChoiceButton::new(
            label,
            CallbackData::Moderation { action, target: record.id.clone() }.encode(),
        )
    };
    ChoiceSet::Inline(vec![
        vec![
            button("✅ Approve", ModerationAction::Approve),
            button("❌ Reject", ModerationAction::Reject),
        ],
        vec![button("💬 Comment", ModerationAction::Annotate)],
    ])
}

pub fn welcome_message(display_name: &str) -> OutboundMessage {
    MessageBuilder::new(format!("👋 Hello, {}!", escape_html(display_name)))
        .blank()
        .line("I collect feedback about our work. You can leave a review at any time.")
        .blank()
        .line("Choose an action from the menu:")
        .menu(main_menu())
        .build()
}

pub fn feedback_prompt() -> OutboundMessage {
    MessageBuilder::new("📝 Write your feedback.")
        .blank()
        .line("Tell us what you liked or what could be better.")
        .line("Send the message when you are ready.")
        .build()
}

pub fn empty_text_reprompt() -> OutboundMessage {
    OutboundMessage::plain("✏️ The message was empty. Please send your feedback as text.")
}

pub fn rating_prompt() -> OutboundMessage {
    MessageBuilder::new("⭐️ Rate your experience from 1 to 5 stars.")
        .blank()
        .line("1 - Very poor")
        .line("5 - Excellent")
        .menu(rating_choices())
        .build()
}

pub fn submission_confirmed() -> OutboundMessage {
    MessageBuilder::new("✅ Thank you for your feedback!")
        .blank()
        .line("We will review it shortly.")
        .menu(main_menu())
        .build()
}

pub fn admin_notification(record: &FeedbackRecord) -> OutboundMessage {
    MessageBuilder::new("🔔 <b>New feedback!</b>")
        .blank()
        .line(format!("👤 <b>From:</b> {}", escape_html(&record.author.handle())))
        .line(format!("🆔 ID: <code>{}</code>", record.author.user_id))
        .line(format!("⭐️ <b>Rating:</b> {}", star_bar(record)))
        .blank()
        .line("📝 <b>Text:</b>")
        .line(admin_text(record))
        .blank()
        .line(format!("🆔 Feedback: <code>{}</code>", record.id))
        .build()
}

pub fn my_feedback_message(records: &[FeedbackRecord], total: u64) -> OutboundMessage {
    if records.is_empty() {
        return MessageBuilder::new("📭 You have not left any feedback yet.")
            .blank()
            .line(format!("Tap «{LEAVE_FEEDBACK_LABEL}» to leave your first one."))
            .menu(main_menu())
            .build();
    }

    let mut builder = MessageBuilder::new(format!("📊 <b>Your feedback</b> ({total}):")).blank();
    for (index, record) in records.iter().take(MY_FEEDBACK_PAGE_SIZE).enumerate() {
        let status = match record.status() {
            FeedbackStatus::Approved => "✅ Approved",
            FeedbackStatus::Rejected => "❌ Rejected",
            FeedbackStatus::Pending => "⏳ Under review",
        };
        let (head, _) = preview(&record.text, MY_TEXT_PREVIEW_CHARS);
        builder = builder
            .line(format!("{}. {} · {status}", index + 1, rating_label(record)))
            .line(format!("   «{}...»", escape_html(&head)))
            .blank();
    }

    let shown = records.len().min(MY_FEEDBACK_PAGE_SIZE) as u64;
    if total > shown {
        builder = builder.line(format!("... and {} more", total - shown));
    }
    builder.menu(main_menu()).build()
}

pub fn help_message() -> OutboundMessage {
    MessageBuilder::new("ℹ️ <b>Help</b>")
        .blank()
        .line("This bot lets you leave feedback about our work.")
        .blank()
        .line("📝 <b>How to leave feedback:</b>")
        .line(format!("1. Tap «{LEAVE_FEEDBACK_LABEL}»"))
        .line("2. Write your feedback")
        .line("3. Pick a rating from 1 to 5")
        .blank()
        .line(format!("{MY_FEEDBACK_LABEL} shows the feedback you have left."))
        .blank()
        .line("An administrator will review your feedback shortly.")
        .menu(main_menu())
        .build()
}

pub fn admin_panel_message() -> OutboundMessage {
    MessageBuilder::new("🛠 <b>Admin panel</b>")
        .blank()
        .line("Choose an action:")
        .menu(admin_menu())
        .build()
}

pub fn back_to_main_message() -> OutboundMessage {
    MessageBuilder::new("🔙 Back to the main menu").menu(main_menu()).build()
}

pub fn nothing_pending_message() -> OutboundMessage {
    MessageBuilder::new("✅ All feedback has been processed!").blank().line("Nothing new.").build()
}

pub fn pending_item_message(record: &FeedbackRecord) -> OutboundMessage {
    MessageBuilder::new("🔔 <b>New feedback</b>")
        .blank()
        .line(format!("👤 <b>From:</b> {}", author_line(record)))
        .line(format!("🆔 ID: <code>{}</code>", record.author.user_id))
        .line(rating_label(record))
        .blank()
        .line("📝 <b>Text:</b>")
        .line(admin_text(record))
        .blank()
        .line(format!("🆔 <code>{}</code>", record.id))
        .menu(moderation_choices(record))
        .build()
}

pub fn pending_overflow_message(shown: usize, total: usize) -> OutboundMessage {
    OutboundMessage::plain(format!(
        "Showing {shown} of {total} pending entries. Moderate these to see the rest."
    ))
}

pub fn no_feedback_message() -> OutboundMessage {
    OutboundMessage::plain("📭 No feedback yet.")
}

pub fn all_item_message(record: &FeedbackRecord) -> OutboundMessage {
    let glyph = match record.status() {
        FeedbackStatus::Approved => "✅",
        FeedbackStatus::Rejected => "❌",
        FeedbackStatus::Pending => "⏳",
    };
    let (head, truncated) = preview(&record.text, ALL_TEXT_PREVIEW_CHARS);
    let ellipsis = if truncated { "..." } else { "" };

    let mut builder = MessageBuilder::new(format!("{glyph} <b>Feedback</b>"))
        .blank()
        .line(format!("👤 {}", author_line(record)))
        .line(rating_label(record))
        .blank()
        .line(format!("📝 {}{ellipsis}", escape_html(&head)));
    if let Some(comment) = record.moderation.comment() {
        builder = builder.line(format!("💬 {}", escape_html(comment)));
    }
    builder.blank().line(format!("🆔 <code>{}</code>", record.id)).build()
}

pub fn stats_message(stats: &FeedbackStats) -> OutboundMessage {
    MessageBuilder::new("📊 <b>Feedback statistics</b>")
        .blank()
        .line(format!("📝 Total: {}", stats.total))
        .line(format!("✅ Approved: {}", stats.approved))
        .line(format!("❌ Rejected: {}", stats.rejected))
        .line(format!("⏳ Under review: {}", stats.pending))
        .blank()
        .line(format!("📈 Approval rate: {}%", stats.approval_percentage()))
        .menu(admin_menu())
        .build()
}

pub fn comment_prompt() -> OutboundMessage {
    OutboundMessage::plain("💬 Enter your comment:")
}

pub fn comment_applied_message() -> OutboundMessage {
    OutboundMessage::plain("✅ Comment added!")
}

pub fn error_message(user_message: &str) -> OutboundMessage {
    OutboundMessage::plain(format!("⚠️ {user_message}"))
}

pub const APPROVED_TOAST: &str = "✅ Feedback approved!";
pub const REJECTED_TOAST: &str = "❌ Feedback rejected";
pub const COMMENT_TOAST: &str = "Write a comment for this feedback";
pub const NOT_PERMITTED_TOAST: &str = "❌ Not permitted";

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use feedloop_core::domain::feedback::{
        Author, FeedbackId, FeedbackRecord, FeedbackStats, NewFeedback, Rating, UserId, Verdict,
    };

    use super::{
        admin_notification, all_item_message, escape_html, moderation_choices,
        my_feedback_message, pending_item_message, rating_choices, stats_message, ChoiceSet,
    };

    fn record(id: &str, text: &str, rating: Option<u8>) -> FeedbackRecord {
        let new = NewFeedback::new(
            Author::new(UserId(7), "Ada"),
            text,
            rating.map(|value| Rating::new(value).expect("valid rating")),
        )
        .expect("valid feedback");
        FeedbackRecord::from_new(FeedbackId(id.to_owned()), new, Utc::now())
    }

    #[test]
    fn rating_keyboard_offers_six_choices() {
        let choices = rating_choices();
        assert_eq!(
            choices.callback_data(),
            vec!["rating_1", "rating_2", "rating_3", "rating_4", "rating_5", "rating_skip"]
        );
    }

    #[test]
    fn moderation_keyboard_targets_the_record() {
        let choices = moderation_choices(&record("fb-3", "text", None));
        assert_eq!(choices.callback_data(), vec!["approve_fb-3", "reject_fb-3", "comment_fb-3"]);
    }

    #[test]
    fn user_text_is_escaped_for_html() {
        assert_eq!(escape_html("<b>a & b</b>"), "&lt;b&gt;a &amp; b&lt;/b&gt;");
    }

    #[test]
    fn all_feedback_truncates_long_text_to_two_hundred_chars() {
        let long = "x".repeat(250);
        let message = all_item_message(&record("fb-1", &long, Some(3)));
        assert!(message.text.contains(&format!("{}...", "x".repeat(200))));
        assert!(!message.text.contains(&"x".repeat(201)));

        let short = all_item_message(&record("fb-2", "short", None));
        assert!(short.text.contains("📝 short\n"));
        assert!(short.text.starts_with("⏳"));
    }

    #[test]
    fn admin_facing_messages_stay_under_the_message_limit() {
        let huge = "y".repeat(4_096);
        let record = record("fb-9", &huge, Some(5));

        for message in [admin_notification(&record), pending_item_message(&record)] {
            assert!(message.text.chars().count() < 4_096);
            assert!(message.text.contains(&format!("{}...", "y".repeat(3_500))));
        }
    }

    #[test]
    fn all_feedback_shows_status_glyph_and_comment() {
        let mut moderated = record("fb-4", "ok", Some(4));
        moderated.moderate(Verdict::Rejected, Some("spam".to_owned()), Utc::now());

        let message = all_item_message(&moderated);
        assert!(message.text.starts_with("❌"));
        assert!(message.text.contains("💬 spam"));
    }

    #[test]
    fn my_feedback_lists_five_and_counts_the_rest() {
        let records: Vec<_> =
            (0..5).map(|index| record(&format!("fb-{index}"), "entry", Some(4))).collect();

        let message = my_feedback_message(&records, 8);
        assert!(message.text.contains("(8)"));
        assert!(message.text.contains("5. ⭐️ 4/5 · ⏳ Under review"));
        assert!(message.text.contains("... and 3 more"));
        assert!(matches!(message.choices, Some(ChoiceSet::Menu(_))));

        let empty = my_feedback_message(&[], 0);
        assert!(empty.text.contains("not left any feedback"));
    }

    #[test]
    fn stats_message_reports_rounded_approval_rate() {
        let stats = FeedbackStats { total: 5, moderated: 2, approved: 1, rejected: 1, pending: 3 };
        let message = stats_message(&stats);
        assert!(message.text.contains("📈 Approval rate: 50%"));
        assert!(message.text.contains("⏳ Under review: 3"));
    }
}
