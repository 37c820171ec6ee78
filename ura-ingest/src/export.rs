//! Export read interface
//!
//! Produces the flattened object table the UI/export layer consumes:
//! objects joined with their declared/detected group names plus an
//! optional ensemble sentiment summary aggregated over each object's
//! reviews.

use crate::sentiment::{ensemble_for_review, EnsembleSentiment};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use ura_common::db::models::Sentiment;
use ura_common::{Error, Result};
use uuid::Uuid;

/// One flattened export row
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    pub object_id: Uuid,
    pub identity_key: String,
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub district: Option<String>,
    pub declared_group: Option<String>,
    pub detected_group: Option<String>,
    pub detected_confidence: Option<f64>,
    pub review_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<ObjectSentimentSummary>,
}

/// Ensemble sentiment aggregated over one object's reviews
///
/// `unknown` counts reviews where no method completed; those never claim
/// to be neutral.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectSentimentSummary {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub unknown: usize,
    pub dominant: Option<Sentiment>,
}

/// Export all objects, flattened
///
/// With `include_sentiment`, each row carries the per-object ensemble
/// summary; without it the export stays a cheap single query.
pub async fn export_objects(pool: &SqlitePool, include_sentiment: bool) -> Result<Vec<ExportRow>> {
    let rows = sqlx::query(
        r#"
        SELECT
            o.guid, o.identity_key, o.name, o.address,
            o.latitude, o.longitude, o.district,
            dg.group_name AS declared_group,
            tg.group_name AS detected_group,
            o.detected_confidence,
            (SELECT COUNT(*) FROM reviews r WHERE r.object_id = o.guid) AS review_count
        FROM objects o
        LEFT JOIN declared_groups dg ON o.declared_group_id = dg.guid
        LEFT JOIN detected_groups tg ON o.detected_group_id = tg.guid
        ORDER BY o.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut export = Vec::with_capacity(rows.len());
    for row in rows {
        let guid: String = row.get("guid");
        let object_id = Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("malformed object guid {}: {}", guid, e)))?;

        let sentiment = if include_sentiment {
            Some(object_sentiment_summary(pool, object_id).await?)
        } else {
            None
        };

        export.push(ExportRow {
            object_id,
            identity_key: row.get("identity_key"),
            name: row.get("name"),
            address: row.get("address"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            district: row.get("district"),
            declared_group: row.get("declared_group"),
            detected_group: row.get("detected_group"),
            detected_confidence: row.get("detected_confidence"),
            review_count: row.get("review_count"),
            sentiment,
        });
    }

    Ok(export)
}

/// Aggregate the ensemble view over one object's reviews
pub async fn object_sentiment_summary(
    pool: &SqlitePool,
    object_id: Uuid,
) -> Result<ObjectSentimentSummary> {
    let review_ids: Vec<String> =
        sqlx::query_scalar("SELECT guid FROM reviews WHERE object_id = ?")
            .bind(object_id.to_string())
            .fetch_all(pool)
            .await?;

    let mut summary = ObjectSentimentSummary::default();
    for guid in review_ids {
        let review_id = Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("malformed review guid {}: {}", guid, e)))?;
        match ensemble_for_review(pool, review_id).await? {
            EnsembleSentiment::Known { sentiment, .. } => match sentiment {
                Sentiment::Positive => summary.positive += 1,
                Sentiment::Negative => summary.negative += 1,
                Sentiment::Neutral => summary.neutral += 1,
            },
            EnsembleSentiment::Unknown => summary.unknown += 1,
        }
    }

    summary.dominant = dominant_sentiment(&summary);
    Ok(summary)
}

fn dominant_sentiment(summary: &ObjectSentimentSummary) -> Option<Sentiment> {
    let candidates = [
        (Sentiment::Positive, summary.positive),
        (Sentiment::Negative, summary.negative),
        (Sentiment::Neutral, summary.neutral),
    ];
    let best = candidates.iter().max_by_key(|(_, count)| *count)?;
    if best.1 == 0 {
        return None;
    }
    // An outright tie has no dominant sentiment
    if candidates.iter().filter(|(_, count)| *count == best.1).count() > 1 {
        return None;
    }
    Some(best.0)
}
