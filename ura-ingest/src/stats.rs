//! Stats read interface
//!
//! Counts of objects by group, sentiment distribution by method, and the
//! orphaned-review validation report (must be zero in a healthy dataset).

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use ura_common::Result;

/// Dataset statistics for the UI/export layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsReport {
    pub objects_total: i64,
    pub reviews_total: i64,
    pub analysis_results_total: i64,
    /// Object counts keyed by declared group type; objects without a
    /// declared group appear under "unassigned"
    pub objects_by_declared_group: BTreeMap<String, i64>,
    /// Object counts keyed by detected group type
    pub objects_by_detected_group: BTreeMap<String, i64>,
    /// Completed-result sentiment counts keyed by method name
    pub sentiment_by_method: BTreeMap<String, SentimentCounts>,
    /// Reviews whose object row is missing; non-zero means the
    /// foreign-key invariants have been violated out-of-band
    pub orphaned_reviews: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SentimentCounts {
    pub positive: i64,
    pub negative: i64,
    pub neutral: i64,
    pub failed: i64,
}

/// Collect the full stats report
pub async fn collect_stats(pool: &SqlitePool) -> Result<StatsReport> {
    let mut report = StatsReport::default();

    report.objects_total = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
        .fetch_one(pool)
        .await?;
    report.reviews_total = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
        .fetch_one(pool)
        .await?;
    report.analysis_results_total = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_results")
        .fetch_one(pool)
        .await?;

    let declared = sqlx::query(
        r#"
        SELECT COALESCE(dg.group_type, 'unassigned') AS group_type, COUNT(*) AS n
        FROM objects o
        LEFT JOIN declared_groups dg ON o.declared_group_id = dg.guid
        GROUP BY dg.group_type
        "#,
    )
    .fetch_all(pool)
    .await?;
    for row in declared {
        report
            .objects_by_declared_group
            .insert(row.get("group_type"), row.get("n"));
    }

    let detected = sqlx::query(
        r#"
        SELECT tg.group_type AS group_type, COUNT(*) AS n
        FROM objects o
        JOIN detected_groups tg ON o.detected_group_id = tg.guid
        GROUP BY tg.group_type
        "#,
    )
    .fetch_all(pool)
    .await?;
    for row in detected {
        report
            .objects_by_detected_group
            .insert(row.get("group_type"), row.get("n"));
    }

    let by_method = sqlx::query(
        r#"
        SELECT
            m.name,
            SUM(CASE WHEN ar.status = 'completed' AND ar.sentiment = 'positive' THEN 1 ELSE 0 END) AS positive,
            SUM(CASE WHEN ar.status = 'completed' AND ar.sentiment = 'negative' THEN 1 ELSE 0 END) AS negative,
            SUM(CASE WHEN ar.status = 'completed' AND ar.sentiment = 'neutral' THEN 1 ELSE 0 END) AS neutral,
            SUM(CASE WHEN ar.status = 'failed' THEN 1 ELSE 0 END) AS failed
        FROM analysis_results ar
        JOIN methods m ON ar.method_id = m.guid
        GROUP BY m.name
        "#,
    )
    .fetch_all(pool)
    .await?;
    for row in by_method {
        report.sentiment_by_method.insert(
            row.get("name"),
            SentimentCounts {
                positive: row.get("positive"),
                negative: row.get("negative"),
                neutral: row.get("neutral"),
                failed: row.get("failed"),
            },
        );
    }

    // FK constraints make this zero in normal operation; the report keeps
    // checking so out-of-band corruption surfaces here first
    report.orphaned_reviews = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM reviews r
        WHERE NOT EXISTS (SELECT 1 FROM objects o WHERE o.guid = r.object_id)
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(report)
}
