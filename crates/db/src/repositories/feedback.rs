use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;

use feedloop_core::domain::feedback::{
    Author, FeedbackId, FeedbackRecord, FeedbackStats, Moderation, NewFeedback, Rating, UserId,
    Verdict,
};

use super::{stored_now, FeedbackRepository, RepositoryError};
use crate::DbPool;

const FEEDBACK_COLUMNS: &str = "id, user_id, username, display_name, surname, text, rating,
     created_at, is_moderated, is_approved, admin_comment, moderated_at";

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn decide(
        &self,
        id: &FeedbackId,
        verdict: Verdict,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, RepositoryError> {
        let query = format!(
            "UPDATE feedback
             SET is_moderated = 1,
                 is_approved = ?,
                 admin_comment = COALESCE(?, admin_comment),
                 moderated_at = ?
             WHERE id = ?
             RETURNING {FEEDBACK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(verdict.is_approved())
            .bind(comment)
            .bind(timestamp(stored_now()))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => row_to_feedback(row),
            None => Err(RepositoryError::NotFound(id.clone())),
        }
    }

    async fn count(&self, predicate: &str) -> Result<u64, RepositoryError> {
        let query = format!("SELECT COUNT(*) FROM feedback WHERE {predicate}");
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        u64::try_from(count).map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn decode<'r, T>(row: &'r sqlx::sqlite::SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_feedback(row: &sqlx::sqlite::SqliteRow) -> Result<FeedbackRecord, RepositoryError> {
    let id: String = decode(row, "id")?;
    let user_id: i64 = decode(row, "user_id")?;
    let username: Option<String> = decode(row, "username")?;
    let display_name: String = decode(row, "display_name")?;
    let surname: Option<String> = decode(row, "surname")?;
    let text: String = decode(row, "text")?;
    let rating: Option<i64> = decode(row, "rating")?;
    let created_at: String = decode(row, "created_at")?;
    let is_moderated: bool = decode(row, "is_moderated")?;
    let is_approved: Option<bool> = decode(row, "is_approved")?;
    let admin_comment: Option<String> = decode(row, "admin_comment")?;
    let moderated_at: Option<String> = decode(row, "moderated_at")?;

    let rating = rating
        .map(Rating::try_from)
        .transpose()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let moderated_at =
        moderated_at.as_deref().map(|raw| parse_timestamp("moderated_at", raw)).transpose()?;
    let moderation = Moderation::from_parts(is_moderated, is_approved, admin_comment, moderated_at)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(FeedbackRecord {
        id: FeedbackId(id),
        author: Author { user_id: UserId(user_id), username, display_name, surname },
        text,
        rating,
        created_at: parse_timestamp("created_at", &created_at)?,
        moderation,
    })
}

#[async_trait::async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn create(&self, feedback: NewFeedback) -> Result<FeedbackRecord, RepositoryError> {
        let record = FeedbackRecord::from_new(
            FeedbackId(Uuid::new_v4().to_string()),
            feedback,
            stored_now(),
        );

        sqlx::query(
            "INSERT INTO feedback (id, user_id, username, display_name, surname, text, rating,
                                   created_at, is_moderated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&record.id.0)
        .bind(record.author.user_id.0)
        .bind(&record.author.username)
        .bind(&record.author.display_name)
        .bind(&record.author.surname)
        .bind(&record.text)
        .bind(record.rating.map(|rating| i64::from(rating.value())))
        .bind(timestamp(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_id(&self, id: &FeedbackId) -> Result<Option<FeedbackRecord>, RepositoryError> {
        let query = format!("SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE id = ?");
        let row = sqlx::query(&query).bind(&id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref r) => Ok(Some(row_to_feedback(r)?)),
            None => Ok(None),
        }
    }

    async fn get_pending(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        let query = format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback
             WHERE is_moderated = 0
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_feedback).collect::<Result<Vec<_>, _>>()
    }

    async fn get_all(&self, limit: u32) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        let query = format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_feedback).collect::<Result<Vec<_>, _>>()
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        let query = format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        );
        let rows = sqlx::query(&query).bind(user_id.0).bind(limit).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_feedback).collect::<Result<Vec<_>, _>>()
    }

    async fn count_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|e| RepositoryError::Decode(e.to_string()))
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
        Ok(FeedbackStats {
            total: self.count("1 = 1").await?,
            moderated: self.count("is_moderated = 1").await?,
            approved: self.count("is_moderated = 1 AND is_approved = 1").await?,
            rejected: self.count("is_moderated = 1 AND is_approved = 0").await?,
            pending: self.count("is_moderated = 0").await?,
        })
    }
}
