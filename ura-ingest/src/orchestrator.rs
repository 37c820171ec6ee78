//! Reconciliation Orchestrator
//!
//! Drives ingestion: for each incoming record it resolves object identity,
//! assigns groups, upserts the review, and schedules sentiment analysis
//! for new or changed reviews. Each record is one atomic unit; the batch
//! as a whole is not. One malformed row must never block an import of
//! thousands.

use crate::geocoder::Geocoder;
use crate::identity::{self, GeoHints, KeyedLocks};
use crate::records::RawRecord;
use crate::reviews;
use crate::sentiment::{AnalysisSummary, ReviewInput, SentimentPipeline};
use crate::groups;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ura_common::db::init::get_setting_or;
use ura_common::events::{EventBus, IngestEvent};
use ura_common::Result;
use uuid::Uuid;

/// One rejected record and why
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// Per-batch summary returned to the caller
///
/// A batch import always completes and returns this report; record-level
/// errors are collected here, never thrown out of the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub total: usize,
    /// Records that created a new object or review
    pub accepted: usize,
    /// Records that touched existing rows (including no-op re-imports)
    pub updated: usize,
    /// Of the updated records, how many changed nothing
    pub unchanged: usize,
    pub rejected: Vec<RejectedRecord>,
    /// Non-fatal per-record validation reports (e.g. nulled ratings)
    pub warnings: Vec<String>,
    pub analyses_completed: usize,
    pub analyses_failed: usize,
    /// True when cancellation stopped the batch before all records ran
    pub cancelled: bool,
}

/// How one record fared
enum RecordKind {
    Accepted,
    Updated { unchanged: bool },
    Rejected(String),
    Cancelled,
}

struct RecordOutcome {
    index: usize,
    kind: RecordKind,
    object_id: Option<Uuid>,
    warnings: Vec<String>,
    analysis: Option<AnalysisSummary>,
}

/// The reconciliation orchestrator
#[derive(Clone)]
pub struct IngestOrchestrator {
    pool: SqlitePool,
    pipeline: SentimentPipeline,
    geocoder: Arc<dyn Geocoder>,
    locks: KeyedLocks,
    events: EventBus,
}

impl IngestOrchestrator {
    pub fn new(
        pool: SqlitePool,
        pipeline: SentimentPipeline,
        geocoder: Arc<dyn Geocoder>,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            pipeline,
            geocoder,
            locks: KeyedLocks::new(),
            events,
        }
    }

    /// Ingest a batch of normalized records
    ///
    /// Records are processed with bounded parallelism; two records for the
    /// same logical object serialize on its identity-key lock.
    /// Cancellation is cooperative: in-flight records complete, records
    /// not yet started are skipped, completed records stay committed.
    pub async fn ingest_batch(
        &self,
        records: Vec<RawRecord>,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        let batch_id = Uuid::new_v4();
        let total = records.len();

        let concurrency: usize = get_setting_or(&self.pool, "ingest_max_concurrent_records", "4")
            .await?
            .parse()
            .unwrap_or(4);

        info!(batch_id = %batch_id, total, concurrency, "Batch ingestion started");
        let _ = self.events.emit(IngestEvent::BatchStarted {
            batch_id,
            total_records: total,
            timestamp: chrono::Utc::now(),
        });

        let outcomes: Vec<RecordOutcome> = stream::iter(records.into_iter().enumerate())
            .map(|(index, record)| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return RecordOutcome {
                            index,
                            kind: RecordKind::Cancelled,
                            object_id: None,
                            warnings: vec![],
                            analysis: None,
                        };
                    }
                    self.process_record(batch_id, index, record).await
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = BatchReport {
            batch_id,
            total,
            ..BatchReport::default()
        };

        let mut rejected = Vec::new();
        for outcome in outcomes {
            match outcome.kind {
                RecordKind::Accepted => report.accepted += 1,
                RecordKind::Updated { unchanged } => {
                    report.updated += 1;
                    if unchanged {
                        report.unchanged += 1;
                    }
                }
                RecordKind::Rejected(reason) => rejected.push(RejectedRecord {
                    index: outcome.index,
                    reason,
                }),
                RecordKind::Cancelled => report.cancelled = true,
            }
            report.warnings.extend(outcome.warnings);
            if let Some(summary) = outcome.analysis {
                report.analyses_completed += summary.completed;
                report.analyses_failed += summary.failed;
            }
        }
        rejected.sort_by_key(|r| r.index);
        report.rejected = rejected;

        info!(
            batch_id = %batch_id,
            accepted = report.accepted,
            updated = report.updated,
            rejected = report.rejected.len(),
            cancelled = report.cancelled,
            "Batch ingestion completed"
        );
        let _ = self.events.emit(IngestEvent::BatchCompleted {
            batch_id,
            accepted: report.accepted,
            updated: report.updated,
            rejected: report.rejected.len(),
            timestamp: chrono::Utc::now(),
        });

        Ok(report)
    }

    /// Process one record as an atomic unit
    ///
    /// Geocoding happens before the transaction (network I/O never runs
    /// inside one); the object upsert, group assignment, and review upsert
    /// commit together or not at all. Sentiment analysis runs after the
    /// commit so a method failure cannot roll back persisted data.
    async fn process_record(
        &self,
        batch_id: Uuid,
        index: usize,
        record: RawRecord,
    ) -> RecordOutcome {
        match self.reconcile(record).await {
            Ok(outcome) => {
                let _ = self.events.emit(IngestEvent::RecordProcessed {
                    batch_id,
                    index,
                    object_id: outcome.object_id,
                    accepted: !matches!(outcome.kind, RecordKind::Rejected(_)),
                    timestamp: chrono::Utc::now(),
                });
                RecordOutcome { index, ..outcome }
            }
            Err(e) => {
                warn!(batch_id = %batch_id, index, error = %e, "Record rejected");
                let _ = self.events.emit(IngestEvent::RecordProcessed {
                    batch_id,
                    index,
                    object_id: None,
                    accepted: false,
                    timestamp: chrono::Utc::now(),
                });
                RecordOutcome {
                    index,
                    kind: RecordKind::Rejected(e.to_string()),
                    object_id: None,
                    warnings: vec![],
                    analysis: None,
                }
            }
        }
    }

    async fn reconcile(&self, record: RawRecord) -> Result<RecordOutcome> {
        let key = identity::identity_key(&record.object.name, &record.object.address)?;

        let hints = self.location_hints(&record).await;

        // Per-identity-key mutual exclusion around the atomic unit:
        // concurrent imports of the same logical place must not race to
        // create two rows
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;

        let resolved = identity::resolve(
            &mut *tx,
            &key,
            &record.object.name,
            &record.object.address,
            &hints,
        )
        .await?;

        if let Some(declared) = record.groups.declared.as_deref() {
            groups::assign_declared(&mut *tx, resolved.object_id, declared).await?;
        }
        if let Some(detected) = &record.groups.detected {
            groups::assign_detected(
                &mut *tx,
                resolved.object_id,
                &detected.group_type,
                &detected.method,
                detected.confidence,
            )
            .await?;
        }

        let mut warnings = Vec::new();
        let mut review_new = false;
        let mut review_unchanged = false;
        let mut analysis_input = None;

        if let Some(review) = &record.review {
            let upserted = reviews::upsert(
                &mut *tx,
                resolved.object_id,
                &review.source,
                &review.external_id,
                &review.text,
                review.rating,
                review.review_date.as_deref(),
            )
            .await?;

            if let Some(validation) = upserted.validation_error {
                warnings.push(validation.to_string());
            }

            review_new = upserted.outcome == reviews::UpsertOutcome::New;
            review_unchanged = upserted.outcome == reviews::UpsertOutcome::Unchanged;

            if upserted.outcome.needs_analysis() {
                // Rating as stored (a nulled rating must not feed methods)
                let stored = reviews::load_text(&mut *tx, upserted.review_id).await?;
                if let Some((text, rating)) = stored {
                    analysis_input = Some(ReviewInput {
                        review_id: upserted.review_id,
                        text,
                        rating,
                    });
                }
            }
        }

        tx.commit().await?;
        drop(_guard);

        let analysis = match analysis_input {
            Some(input) => {
                let summary = self.pipeline.analyze_review(&input).await?;
                let _ = self.events.emit(IngestEvent::AnalysisCompleted {
                    review_id: input.review_id,
                    methods_completed: summary.completed,
                    methods_failed: summary.failed,
                    timestamp: chrono::Utc::now(),
                });
                Some(summary)
            }
            None => None,
        };

        let kind = if resolved.created || review_new {
            RecordKind::Accepted
        } else {
            RecordKind::Updated {
                unchanged: review_unchanged,
            }
        };

        Ok(RecordOutcome {
            index: 0, // filled in by process_record
            kind,
            object_id: Some(resolved.object_id),
            warnings,
            analysis,
        })
    }

    /// Location hints for a record: coordinates carried by the record win;
    /// otherwise ask the geocoder. NotFound and geocoder errors are
    /// non-fatal.
    async fn location_hints(&self, record: &RawRecord) -> GeoHints {
        let object = &record.object;
        if object.latitude.is_some() && object.longitude.is_some() {
            return GeoHints {
                latitude: object.latitude,
                longitude: object.longitude,
                district: object.district.clone(),
            };
        }

        match self.geocoder.geocode(&object.address).await {
            Ok(Some(point)) => GeoHints {
                latitude: Some(point.latitude),
                longitude: Some(point.longitude),
                district: point.district.or_else(|| object.district.clone()),
            },
            Ok(None) => {
                let _ = self.events.emit(IngestEvent::GeocodeMissed {
                    address: object.address.clone(),
                    timestamp: chrono::Utc::now(),
                });
                GeoHints {
                    latitude: None,
                    longitude: None,
                    district: object.district.clone(),
                }
            }
            Err(e) => {
                warn!(address = %object.address, error = %e, "Geocoder error, continuing without coordinates");
                GeoHints {
                    latitude: None,
                    longitude: None,
                    district: object.district.clone(),
                }
            }
        }
    }
}
