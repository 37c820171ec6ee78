//! Sentiment Pipeline
//!
//! Runs a configurable ordered set of analysis methods against a review's
//! text, stores exactly one result per (review, method), and exposes a
//! reconciled, confidence-weighted ensemble view.
//!
//! Each method is a pluggable capability behind the [`SentimentMethod`]
//! trait, registered process-wide against the `methods` table. A method
//! failure or timeout is isolated to that (review, method) pair: it is
//! persisted as a `failed` row and never aborts the other methods or
//! other reviews in the batch.

mod lexicon;
mod llm_remote;
mod user_rating;

pub use lexicon::LexiconRuleMethod;
pub use llm_remote::{LlmRemoteConfig, LlmRemoteMethod};
pub use user_rating::UserRatingMethod;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use ura_common::db::models::{AnalysisResultRow, AnalysisStatus, MethodRow, ReviewType, Sentiment};
use ura_common::{Error, Result};
use uuid::Uuid;

/// Input handed to every method for one review
#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub review_id: Uuid,
    pub text: String,
    pub rating: Option<i64>,
}

/// Output of one method on one review
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub review_type: ReviewType,
    pub keywords: Vec<String>,
    pub topics: Vec<String>,
}

/// A pluggable sentiment-analysis capability
///
/// Implementations must be pure functions of the input text/rating so
/// that concurrent runs over different methods are independent.
#[async_trait]
pub trait SentimentMethod: Send + Sync {
    /// Registry name; must match a row in the `methods` table
    fn name(&self) -> &'static str;

    /// Analyze one review
    async fn analyze(&self, input: &ReviewInput) -> Result<Analysis>;
}

/// One method as registered in the database, paired with its implementation
#[derive(Clone)]
pub struct RegisteredMethod {
    pub row: MethodRow,
    implementation: Arc<dyn SentimentMethod>,
}

/// Process-wide method registry backed by the `methods` table
///
/// Rows without a matching built-in implementation are skipped with a
/// warning; implementations without a row never run.
pub struct MethodRegistry {
    methods: Vec<RegisteredMethod>,
}

impl MethodRegistry {
    /// Load the registry: join `methods` rows with the built-in
    /// implementations. The remote LLM method only participates when its
    /// client could be configured.
    pub async fn load(pool: &SqlitePool, llm: Option<LlmRemoteConfig>) -> Result<Self> {
        let mut implementations: Vec<Arc<dyn SentimentMethod>> = vec![
            Arc::new(UserRatingMethod),
            Arc::new(LexiconRuleMethod::new()),
        ];
        match llm {
            Some(config) => implementations.push(Arc::new(LlmRemoteMethod::new(config)?)),
            None => debug!("Remote LLM method not configured; it will not run"),
        }

        let rows = sqlx::query(
            "SELECT guid, name, description, trust_rank, is_active FROM methods ORDER BY trust_rank",
        )
        .fetch_all(pool)
        .await?;

        let mut methods = Vec::new();
        for row in rows {
            let guid: String = row.get("guid");
            let is_active: i64 = row.get("is_active");
            let method_row = MethodRow {
                guid: Uuid::parse_str(&guid)
                    .map_err(|e| Error::Internal(format!("malformed method guid {}: {}", guid, e)))?,
                name: row.get("name"),
                description: row.get("description"),
                trust_rank: row.get("trust_rank"),
                is_active: is_active != 0,
            };

            match implementations.iter().find(|imp| imp.name() == method_row.name) {
                Some(implementation) => methods.push(RegisteredMethod {
                    row: method_row,
                    implementation: implementation.clone(),
                }),
                None => {
                    warn!(method = %method_row.name, "Registered method has no implementation, skipping")
                }
            }
        }

        Ok(Self { methods })
    }

    /// Methods the orchestrator schedules for new/changed reviews
    pub fn active(&self) -> impl Iterator<Item = &RegisteredMethod> {
        self.methods.iter().filter(|m| m.row.is_active)
    }

    pub fn all(&self) -> &[RegisteredMethod] {
        &self.methods
    }
}

/// Per-review outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct AnalysisSummary {
    pub completed: usize,
    pub failed: usize,
}

/// The sentiment pipeline: runs active methods and persists results
#[derive(Clone)]
pub struct SentimentPipeline {
    pool: SqlitePool,
    registry: Arc<MethodRegistry>,
    method_timeout: Duration,
}

impl SentimentPipeline {
    pub fn new(pool: SqlitePool, registry: Arc<MethodRegistry>, method_timeout: Duration) -> Self {
        Self {
            pool,
            registry,
            method_timeout,
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Run every active method against one review
    ///
    /// Methods run concurrently; each is wrapped in a timeout. A failure
    /// or timeout produces a `failed` row for that (review, method) pair
    /// only. Completed results overwrite any prior result for the pair.
    pub async fn analyze_review(&self, input: &ReviewInput) -> Result<AnalysisSummary> {
        let runs = self.registry.active().map(|method| {
            let method = method.clone();
            let input = input.clone();
            let pool = self.pool.clone();
            let timeout = self.method_timeout;
            async move {
                let outcome =
                    tokio::time::timeout(timeout, method.implementation.analyze(&input)).await;

                match outcome {
                    Ok(Ok(analysis)) => {
                        store_completed(&pool, input.review_id, method.row.guid, &analysis)
                            .await?;
                        Ok::<bool, Error>(true)
                    }
                    Ok(Err(e)) => {
                        warn!(
                            review_id = %input.review_id,
                            method = %method.row.name,
                            error = %e,
                            "Sentiment method failed"
                        );
                        store_failed(&pool, input.review_id, method.row.guid, &e.to_string())
                            .await?;
                        Ok(false)
                    }
                    Err(_) => {
                        warn!(
                            review_id = %input.review_id,
                            method = %method.row.name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Sentiment method timed out"
                        );
                        store_failed(&pool, input.review_id, method.row.guid, "timed out")
                            .await?;
                        Ok(false)
                    }
                }
            }
        });

        let mut summary = AnalysisSummary::default();
        for result in futures::future::join_all(runs).await {
            match result? {
                true => summary.completed += 1,
                false => summary.failed += 1,
            }
        }

        debug!(
            review_id = %input.review_id,
            completed = summary.completed,
            failed = summary.failed,
            "Sentiment pipeline finished for review"
        );
        Ok(summary)
    }
}

/// Store a completed result, overwriting any prior row for the pair
pub async fn store_completed(
    pool: &SqlitePool,
    review_id: Uuid,
    method_id: Uuid,
    analysis: &Analysis,
) -> Result<()> {
    let keywords = serde_json::to_string(&analysis.keywords)
        .map_err(|e| Error::Internal(format!("serialize keywords: {}", e)))?;
    let topics = serde_json::to_string(&analysis.topics)
        .map_err(|e| Error::Internal(format!("serialize topics: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO analysis_results
            (guid, review_id, method_id, status, sentiment, confidence, review_type, keywords, topics, error, processed_at)
        VALUES (?, ?, ?, 'completed', ?, ?, ?, ?, ?, NULL, CURRENT_TIMESTAMP)
        ON CONFLICT(review_id, method_id) DO UPDATE SET
            status = 'completed',
            sentiment = excluded.sentiment,
            confidence = excluded.confidence,
            review_type = excluded.review_type,
            keywords = excluded.keywords,
            topics = excluded.topics,
            error = NULL,
            processed_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(review_id.to_string())
    .bind(method_id.to_string())
    .bind(analysis.sentiment.as_str())
    .bind(analysis.confidence)
    .bind(analysis.review_type.as_str())
    .bind(keywords)
    .bind(topics)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store a failed terminal state for the pair
pub async fn store_failed(
    pool: &SqlitePool,
    review_id: Uuid,
    method_id: Uuid,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO analysis_results
            (guid, review_id, method_id, status, sentiment, confidence, review_type, keywords, topics, error, processed_at)
        VALUES (?, ?, ?, 'failed', NULL, NULL, NULL, '[]', '[]', ?, CURRENT_TIMESTAMP)
        ON CONFLICT(review_id, method_id) DO UPDATE SET
            status = 'failed',
            sentiment = NULL,
            confidence = NULL,
            review_type = NULL,
            keywords = '[]',
            topics = '[]',
            error = excluded.error,
            processed_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(review_id.to_string())
    .bind(method_id.to_string())
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

/// The reconciled sentiment for one review
///
/// `Unknown` is distinct from neutral: it means no method completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnsembleSentiment {
    Known { sentiment: Sentiment, score: f64 },
    Unknown,
}

impl EnsembleSentiment {
    pub fn sentiment(&self) -> Option<Sentiment> {
        match self {
            EnsembleSentiment::Known { sentiment, .. } => Some(*sentiment),
            EnsembleSentiment::Unknown => None,
        }
    }
}

/// Derive the ensemble view for one review
///
/// Sums confidence per sentiment over completed results; the sentiment
/// with the highest sum wins. Ties break toward the sentiment backed by
/// the most trusted method (lowest trust_rank). Failed rows never
/// contribute.
pub async fn ensemble_for_review(pool: &SqlitePool, review_id: Uuid) -> Result<EnsembleSentiment> {
    let rows = sqlx::query(
        r#"
        SELECT ar.sentiment, ar.confidence, m.trust_rank
        FROM analysis_results ar
        JOIN methods m ON ar.method_id = m.guid
        WHERE ar.review_id = ? AND ar.status = 'completed'
        "#,
    )
    .bind(review_id.to_string())
    .fetch_all(pool)
    .await?;

    // (summed confidence, best trust rank) per sentiment
    let mut tallies: Vec<(Sentiment, f64, i64)> = Vec::new();
    for row in rows {
        let sentiment_str: String = row.get("sentiment");
        let sentiment = Sentiment::parse(&sentiment_str).ok_or_else(|| {
            Error::Internal(format!("unknown stored sentiment {}", sentiment_str))
        })?;
        let confidence: f64 = row.get("confidence");
        let trust_rank: i64 = row.get("trust_rank");

        match tallies.iter_mut().find(|(s, _, _)| *s == sentiment) {
            Some((_, sum, best_rank)) => {
                *sum += confidence;
                *best_rank = (*best_rank).min(trust_rank);
            }
            None => tallies.push((sentiment, confidence, trust_rank)),
        }
    }

    let winner = tallies.into_iter().max_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            // lower trust_rank wins a tie, so compare reversed
            .then(b.2.cmp(&a.2))
    });

    Ok(match winner {
        Some((sentiment, score, _)) => EnsembleSentiment::Known { sentiment, score },
        None => EnsembleSentiment::Unknown,
    })
}

/// Load every stored result for one review, most trusted method first
///
/// The per-review method-comparison view in the UI consumes this.
pub async fn results_for_review(
    pool: &SqlitePool,
    review_id: Uuid,
) -> Result<Vec<AnalysisResultRow>> {
    let rows = sqlx::query(
        r#"
        SELECT ar.guid, ar.review_id, ar.method_id, ar.status, ar.sentiment,
               ar.confidence, ar.review_type, ar.keywords, ar.topics, ar.error,
               ar.processed_at
        FROM analysis_results ar
        JOIN methods m ON ar.method_id = m.guid
        WHERE ar.review_id = ?
        ORDER BY m.trust_rank
        "#,
    )
    .bind(review_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(map_result_row(&row)?);
    }
    Ok(results)
}

fn map_result_row(row: &sqlx::sqlite::SqliteRow) -> Result<AnalysisResultRow> {
    let parse_uuid = |column: &str| -> Result<Uuid> {
        let value: String = row.get(column);
        Uuid::parse_str(&value)
            .map_err(|e| Error::Internal(format!("malformed {} {}: {}", column, value, e)))
    };

    let status_str: String = row.get("status");
    let status = AnalysisStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("unknown analysis status {}", status_str)))?;

    let sentiment = row
        .get::<Option<String>, _>("sentiment")
        .as_deref()
        .and_then(Sentiment::parse);
    let review_type = row
        .get::<Option<String>, _>("review_type")
        .as_deref()
        .and_then(ReviewType::parse);

    let keywords_json: String = row.get("keywords");
    let topics_json: String = row.get("topics");
    let keywords = serde_json::from_str(&keywords_json).unwrap_or_default();
    let topics = serde_json::from_str(&topics_json).unwrap_or_default();

    let processed_at: String = row.get("processed_at");
    let processed_at = chrono::DateTime::parse_from_rfc3339(&processed_at)
        .map(|t| t.with_timezone(&chrono::Utc))
        .or_else(|_| {
            // CURRENT_TIMESTAMP writes "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&processed_at, "%Y-%m-%d %H:%M:%S")
                .map(|t| t.and_utc())
        })
        .map_err(|e| Error::Internal(format!("malformed processed_at {}: {}", processed_at, e)))?;

    Ok(AnalysisResultRow {
        guid: parse_uuid("guid")?,
        review_id: parse_uuid("review_id")?,
        method_id: parse_uuid("method_id")?,
        status,
        sentiment,
        confidence: row.get("confidence"),
        review_type,
        keywords,
        topics,
        error: row.get("error"),
        processed_at,
    })
}
