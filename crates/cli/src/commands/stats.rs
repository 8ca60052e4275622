use feedloop_db::{FeedbackRepository, SqlFeedbackRepository};

use crate::commands::{with_migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    with_migrated_pool("stats", |pool| async move {
        let stats = SqlFeedbackRepository::new(pool)
            .stats()
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?;

        Ok(format!(
            "total={} pending={} approved={} rejected={} approval_rate={}%",
            stats.total,
            stats.pending,
            stats.approved,
            stats.rejected,
            stats.approval_percentage()
        ))
    })
}
