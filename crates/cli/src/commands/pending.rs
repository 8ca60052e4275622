use feedloop_core::domain::feedback::FeedbackRecord;
use feedloop_db::{FeedbackRepository, SqlFeedbackRepository};

use crate::commands::{with_migrated_pool, CommandResult};

pub const DEFAULT_LIMIT: u32 = 10;
const PREVIEW_CHARS: usize = 60;

pub fn run(limit: u32) -> CommandResult {
    with_migrated_pool("pending", move |pool| async move {
        let pending = SqlFeedbackRepository::new(pool)
            .get_pending(limit)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?;

        if pending.is_empty() {
            return Ok("no feedback awaiting moderation".to_string());
        }

        let mut lines = vec![format!("{} entr(ies) awaiting moderation:", pending.len())];
        lines.extend(pending.iter().map(render_entry));
        Ok(lines.join("\n"))
    })
}

fn render_entry(record: &FeedbackRecord) -> String {
    let rating = record
        .rating
        .map(|rating| format!("{}/5", rating.value()))
        .unwrap_or_else(|| "unrated".to_string());
    format!(
        "- {} [{}] {} by {}: {}",
        record.id,
        record.created_at.format("%Y-%m-%d %H:%M"),
        rating,
        record.author.handle(),
        preview(&record.text)
    )
}

fn preview(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= PREVIEW_CHARS {
        return flattened;
    }
    let cut: String = flattened.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}
