//! End-to-end ingest workflow tests
//!
//! Drives the orchestrator through full batches against an in-memory
//! database and checks the reconciliation invariants: idempotence,
//! partial-failure semantics, identity stability, and analysis scheduling.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use ura_common::db::init;
use ura_common::events::EventBus;
use ura_ingest::geocoder::{GeoPoint, Geocoder, NullGeocoder};
use ura_ingest::orchestrator::IngestOrchestrator;
use ura_ingest::records::{DetectedGroupFields, GroupFields, ObjectFields, RawRecord, ReviewFields};
use ura_ingest::sentiment::{MethodRegistry, SentimentPipeline};
use ura_common::Result;

async fn build_orchestrator(
    pool: &sqlx::SqlitePool,
    geocoder: Arc<dyn Geocoder>,
) -> IngestOrchestrator {
    let registry = Arc::new(MethodRegistry::load(pool, None).await.unwrap());
    let pipeline = SentimentPipeline::new(pool.clone(), registry, Duration::from_secs(5));
    IngestOrchestrator::new(pool.clone(), pipeline, geocoder, EventBus::new(64))
}

fn hospital_record() -> RawRecord {
    RawRecord {
        object: ObjectFields {
            name: "Городская больница №1".to_string(),
            address: "ул. Ленина, 10".to_string(),
            latitude: None,
            longitude: None,
            district: None,
        },
        groups: GroupFields {
            declared: Some("hospitals".to_string()),
            detected: None,
        },
        review: Some(ReviewFields {
            source: "yandex".to_string(),
            external_id: "abc1".to_string(),
            text: "Отлично".to_string(),
            rating: Some(5),
            review_date: Some("2025-05-01".to_string()),
        }),
    }
}

fn school_record(n: usize) -> RawRecord {
    RawRecord {
        object: ObjectFields {
            name: format!("Школа №{}", n),
            address: format!("пр. Мира, {}", n),
            latitude: None,
            longitude: None,
            district: None,
        },
        groups: GroupFields {
            declared: Some("schools".to_string()),
            detected: None,
        },
        review: None,
    }
}

async fn table_counts(pool: &sqlx::SqlitePool) -> (i64, i64, i64) {
    let objects = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
        .fetch_one(pool)
        .await
        .unwrap();
    let reviews = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
        .fetch_one(pool)
        .await
        .unwrap();
    let results = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_results")
        .fetch_one(pool)
        .await
        .unwrap();
    (objects, reviews, results)
}

#[tokio::test]
async fn importing_twice_is_idempotent() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    let report = orchestrator
        .ingest_batch(vec![hospital_record()], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.accepted, 1);
    assert!(report.rejected.is_empty());

    let first_counts = table_counts(&pool).await;
    // user_rating and lexicon_rule both completed
    assert_eq!(first_counts, (1, 1, 2));

    // Re-import the identical record: row counts must not move and no
    // second AnalysisResult per method may appear
    let report = orchestrator
        .ingest_batch(vec![hospital_record()], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.accepted, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 1);

    assert_eq!(table_counts(&pool).await, first_counts);
}

#[tokio::test]
async fn hospital_scenario_yields_confident_positive() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    orchestrator
        .ingest_batch(vec![hospital_record()], CancellationToken::new())
        .await
        .unwrap();

    let row: (String, f64) = sqlx::query_as(
        r#"
        SELECT ar.sentiment, ar.confidence
        FROM analysis_results ar
        JOIN methods m ON ar.method_id = m.guid
        JOIN reviews r ON ar.review_id = r.guid
        WHERE m.name = 'user_rating' AND r.source = 'yandex' AND r.external_id = 'abc1'
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(row.0, "positive");
    assert!((row.1 - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn one_bad_record_does_not_sink_the_batch() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    let mut records: Vec<RawRecord> = (1..=9).map(school_record).collect();
    records.insert(
        4,
        RawRecord {
            object: ObjectFields {
                name: "   ".to_string(),
                address: "ул. Пустая, 0".to_string(),
                latitude: None,
                longitude: None,
                district: None,
            },
            groups: GroupFields::default(),
            review: None,
        },
    );

    let report = orchestrator
        .ingest_batch(records, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 10);
    assert_eq!(report.accepted, 9);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].index, 4);
    assert!(report.rejected[0].reason.contains("Invalid identity"));

    let (objects, _, _) = table_counts(&pool).await;
    assert_eq!(objects, 9);
}

#[tokio::test]
async fn out_of_range_rating_is_reported_not_fatal() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    let mut record = hospital_record();
    record.review.as_mut().unwrap().rating = Some(9);

    let report = orchestrator
        .ingest_batch(vec![record], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("rating"));

    let stored: Option<i64> = sqlx::query_scalar("SELECT rating FROM reviews WHERE external_id = 'abc1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, None);

    // user_rating fails on the nulled rating, lexicon still completes
    assert_eq!(report.analyses_completed, 1);
    assert_eq!(report.analyses_failed, 1);
}

#[tokio::test]
async fn detected_group_confidence_never_decreases() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    let mut record = school_record(1);
    record.groups.detected = Some(DetectedGroupFields {
        group_type: "schools".to_string(),
        method: "keyword".to_string(),
        confidence: 0.8,
    });
    orchestrator
        .ingest_batch(vec![record.clone()], CancellationToken::new())
        .await
        .unwrap();

    // A later import with a weaker detection must not win
    record.groups.detected = Some(DetectedGroupFields {
        group_type: "kindergartens".to_string(),
        method: "keyword".to_string(),
        confidence: 0.4,
    });
    orchestrator
        .ingest_batch(vec![record], CancellationToken::new())
        .await
        .unwrap();

    let (group_type, confidence): (String, f64) = sqlx::query_as(
        r#"
        SELECT dg.group_type, o.detected_confidence
        FROM objects o JOIN detected_groups dg ON o.detected_group_id = dg.guid
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(group_type, "schools");
    assert!((confidence - 0.8).abs() < f64::EPSILON);
}

#[tokio::test]
async fn same_object_across_records_deduplicates() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    // Same place, inconsistent formatting, two different reviews
    let mut first = hospital_record();
    first.object.name = "  городская БОЛЬНИЦА №1 ".to_string();
    let mut second = hospital_record();
    second.review.as_mut().unwrap().external_id = "abc2".to_string();
    second.review.as_mut().unwrap().text = "Очереди, недоволен".to_string();
    second.review.as_mut().unwrap().rating = Some(2);

    let report = orchestrator
        .ingest_batch(vec![first, second], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.accepted, 2);

    let (objects, reviews, _) = table_counts(&pool).await;
    assert_eq!(objects, 1);
    assert_eq!(reviews, 2);
}

struct FixedGeocoder;

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
        Ok(Some(GeoPoint {
            latitude: 55.7558,
            longitude: 37.6176,
            district: Some("Тверской".to_string()),
        }))
    }
}

#[tokio::test]
async fn geocoder_fills_missing_coordinates() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(FixedGeocoder)).await;

    orchestrator
        .ingest_batch(vec![school_record(3)], CancellationToken::new())
        .await
        .unwrap();

    let (latitude, district): (f64, String) =
        sqlx::query_as("SELECT latitude, district FROM objects")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!((latitude - 55.7558).abs() < 1e-9);
    assert_eq!(district, "Тверской");
}

#[tokio::test]
async fn geocoder_miss_keeps_object_without_coordinates() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    let report = orchestrator
        .ingest_batch(vec![school_record(4)], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.accepted, 1);

    let latitude: Option<f64> = sqlx::query_scalar("SELECT latitude FROM objects")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(latitude, None);
}

#[tokio::test]
async fn cancelled_batch_skips_unstarted_records() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator
        .ingest_batch((1..=5).map(school_record).collect(), cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.accepted, 0);

    let (objects, _, _) = table_counts(&pool).await;
    assert_eq!(objects, 0);
}

#[tokio::test]
async fn changed_review_triggers_reanalysis() {
    let pool = init::init_in_memory().await.unwrap();
    let orchestrator = build_orchestrator(&pool, Arc::new(NullGeocoder)).await;

    orchestrator
        .ingest_batch(vec![hospital_record()], CancellationToken::new())
        .await
        .unwrap();

    let mut edited = hospital_record();
    edited.review.as_mut().unwrap().text = "Ужасно, очереди".to_string();
    edited.review.as_mut().unwrap().rating = Some(1);

    let report = orchestrator
        .ingest_batch(vec![edited], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 0);
    assert_eq!(report.analyses_completed, 2);

    // Still one result per (review, method); the user_rating verdict flipped
    let (results, sentiment): (i64, String) = {
        let results = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_results")
            .fetch_one(&pool)
            .await
            .unwrap();
        let sentiment = sqlx::query_scalar(
            r#"
            SELECT ar.sentiment FROM analysis_results ar
            JOIN methods m ON ar.method_id = m.guid
            WHERE m.name = 'user_rating'
            "#,
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        (results, sentiment)
    };
    assert_eq!(results, 2);
    assert_eq!(sentiment, "negative");
}
