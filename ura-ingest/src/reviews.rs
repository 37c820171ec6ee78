//! Review Ledger
//!
//! Stores reviews keyed by (source, external_id) with upsert semantics.
//! The "changed" outcome is the signal the orchestrator uses to decide
//! whether re-analysis is required, so it is reported only when text or
//! rating actually differs.

use sqlx::{Row, SqliteConnection};
use tracing::debug;
use ura_common::{Error, Result};
use uuid::Uuid;

/// What the upsert did, from the orchestrator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting of this (source, external_id)
    New,
    /// Existing review whose text or rating differs from the stored values
    Changed,
    /// Existing review, nothing material differs
    Unchanged,
}

impl UpsertOutcome {
    /// True when the review needs (re-)analysis
    pub fn needs_analysis(&self) -> bool {
        matches!(self, UpsertOutcome::New | UpsertOutcome::Changed)
    }
}

/// Result of one review upsert
#[derive(Debug)]
pub struct UpsertedReview {
    pub review_id: Uuid,
    pub outcome: UpsertOutcome,
    /// Set when the incoming rating was outside [1,5]: the review was
    /// stored with a NULL rating and this carries the reportable error
    pub validation_error: Option<Error>,
}

/// Insert or update a review for an object
///
/// Ratings outside [1,5] do not fail the record: the review is stored
/// with `rating = NULL` and the validation error is returned alongside
/// for the batch report.
pub async fn upsert(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    source: &str,
    external_id: &str,
    text: &str,
    rating: Option<i64>,
    review_date: Option<&str>,
) -> Result<UpsertedReview> {
    let (rating, validation_error) = match rating {
        Some(r) if !(1..=5).contains(&r) => (
            None,
            Some(Error::Validation(format!(
                "rating {} outside [1,5] for review {}/{}, stored as NULL",
                r, source, external_id
            ))),
        ),
        other => (other, None),
    };

    let existing = sqlx::query(
        "SELECT guid, text, rating FROM reviews WHERE source = ? AND external_id = ?",
    )
    .bind(source)
    .bind(external_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = existing {
        let guid: String = row.get("guid");
        let review_id = Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("malformed review guid {}: {}", guid, e)))?;
        let stored_text: String = row.get("text");
        let stored_rating: Option<i64> = row.get("rating");

        let changed = stored_text != text || stored_rating != rating;
        if !changed {
            return Ok(UpsertedReview {
                review_id,
                outcome: UpsertOutcome::Unchanged,
                validation_error,
            });
        }

        sqlx::query(
            r#"
            UPDATE reviews SET
                text = ?,
                rating = ?,
                review_date = COALESCE(?, review_date),
                updated_at = CURRENT_TIMESTAMP
            WHERE guid = ?
            "#,
        )
        .bind(text)
        .bind(rating)
        .bind(review_date)
        .bind(review_id.to_string())
        .execute(&mut *conn)
        .await?;

        debug!(review_id = %review_id, source = %source, external_id = %external_id, "Updated review");
        return Ok(UpsertedReview {
            review_id,
            outcome: UpsertOutcome::Changed,
            validation_error,
        });
    }

    let review_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO reviews (guid, object_id, text, rating, review_date, source, external_id)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(review_id.to_string())
    .bind(object_id.to_string())
    .bind(text)
    .bind(rating)
    .bind(review_date)
    .bind(source)
    .bind(external_id)
    .execute(&mut *conn)
    .await?;

    debug!(review_id = %review_id, source = %source, external_id = %external_id, "Created review");
    Ok(UpsertedReview {
        review_id,
        outcome: UpsertOutcome::New,
        validation_error,
    })
}

/// Load the text and rating of one review (for re-analysis scheduling)
pub async fn load_text(
    conn: &mut SqliteConnection,
    review_id: Uuid,
) -> Result<Option<(String, Option<i64>)>> {
    let row = sqlx::query("SELECT text, rating FROM reviews WHERE guid = ?")
        .bind(review_id.to_string())
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|r| (r.get("text"), r.get("rating"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{self, GeoHints};
    use ura_common::db::init;

    async fn make_object(conn: &mut SqliteConnection) -> Uuid {
        let key = identity::identity_key("Поликлиника №3", "ул. Гагарина, 8").unwrap();
        identity::resolve(conn, &key, "Поликлиника №3", "ул. Гагарина, 8", &GeoHints::default())
            .await
            .unwrap()
            .object_id
    }

    #[tokio::test]
    async fn upsert_reports_new_changed_unchanged() {
        let pool = init::init_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let object_id = make_object(&mut conn).await;

        let first = upsert(&mut conn, object_id, "yandex", "r1", "Хорошо", Some(4), None)
            .await
            .unwrap();
        assert_eq!(first.outcome, UpsertOutcome::New);

        let same = upsert(&mut conn, object_id, "yandex", "r1", "Хорошо", Some(4), None)
            .await
            .unwrap();
        assert_eq!(same.outcome, UpsertOutcome::Unchanged);
        assert_eq!(same.review_id, first.review_id);
        assert!(!same.outcome.needs_analysis());

        let edited = upsert(&mut conn, object_id, "yandex", "r1", "Хорошо, но очереди", Some(4), None)
            .await
            .unwrap();
        assert_eq!(edited.outcome, UpsertOutcome::Changed);
        assert_eq!(edited.review_id, first.review_id);
        assert!(edited.outcome.needs_analysis());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rating_change_alone_marks_changed() {
        let pool = init::init_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let object_id = make_object(&mut conn).await;

        upsert(&mut conn, object_id, "2gis", "r9", "Сойдет", Some(3), None)
            .await
            .unwrap();
        let second = upsert(&mut conn, object_id, "2gis", "r9", "Сойдет", Some(2), None)
            .await
            .unwrap();
        assert_eq!(second.outcome, UpsertOutcome::Changed);
    }

    #[tokio::test]
    async fn out_of_range_rating_stored_as_null_and_reported() {
        let pool = init::init_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let object_id = make_object(&mut conn).await;

        let result = upsert(&mut conn, object_id, "yandex", "r2", "Текст", Some(11), None)
            .await
            .unwrap();
        assert_eq!(result.outcome, UpsertOutcome::New);
        assert!(matches!(result.validation_error, Some(Error::Validation(_))));

        let stored: Option<i64> = sqlx::query_scalar("SELECT rating FROM reviews WHERE guid = ?")
            .bind(result.review_id.to_string())
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(stored, None);
    }

    #[tokio::test]
    async fn reviews_belong_to_one_object() {
        let pool = init::init_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let object_id = make_object(&mut conn).await;

        let first = upsert(&mut conn, object_id, "yandex", "r3", "Текст", None, Some("2025-05-01"))
            .await
            .unwrap();

        let owner: String = sqlx::query_scalar("SELECT object_id FROM reviews WHERE guid = ?")
            .bind(first.review_id.to_string())
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(owner, object_id.to_string());
    }
}
