//! Export and stats read-interface tests

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use ura_common::db::init;
use ura_common::db::models::Sentiment;
use ura_common::events::EventBus;
use ura_ingest::export;
use ura_ingest::geocoder::NullGeocoder;
use ura_ingest::orchestrator::IngestOrchestrator;
use ura_ingest::records::{GroupFields, ObjectFields, RawRecord, ReviewFields};
use ura_ingest::sentiment::{MethodRegistry, SentimentPipeline};
use ura_ingest::stats;

async fn build_orchestrator(pool: &sqlx::SqlitePool) -> IngestOrchestrator {
    let registry = Arc::new(MethodRegistry::load(pool, None).await.unwrap());
    let pipeline = SentimentPipeline::new(pool.clone(), registry, Duration::from_secs(5));
    IngestOrchestrator::new(pool.clone(), pipeline, Arc::new(NullGeocoder), EventBus::new(64))
}

fn record(name: &str, group: &str, reviews: &[(&str, i64)]) -> Vec<RawRecord> {
    let base = |review: Option<ReviewFields>| RawRecord {
        object: ObjectFields {
            name: name.to_string(),
            address: format!("адрес {}", name),
            latitude: None,
            longitude: None,
            district: None,
        },
        groups: GroupFields {
            declared: Some(group.to_string()),
            detected: None,
        },
        review,
    };

    if reviews.is_empty() {
        return vec![base(None)];
    }

    reviews
        .iter()
        .enumerate()
        .map(|(i, (text, rating))| {
            base(Some(ReviewFields {
                source: "yandex".to_string(),
                external_id: format!("{}-{}", name, i),
                text: text.to_string(),
                rating: Some(*rating),
                review_date: None,
            }))
        })
        .collect()
}

async fn seed_dataset(pool: &sqlx::SqlitePool) {
    let orchestrator = build_orchestrator(pool).await;

    let mut records = record("Больница №1", "hospitals", &[("Отлично", 5), ("Ужасно", 1)]);
    records.extend(record("Школа №7", "schools", &[("Спасибо, хорошо", 5)]));
    records.extend(record("Школа №9", "schools", &[]));

    orchestrator
        .ingest_batch(records, CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn export_joins_group_names() {
    let pool = init::init_in_memory().await.unwrap();
    seed_dataset(&pool).await;

    let rows = export::export_objects(&pool, false).await.unwrap();
    assert_eq!(rows.len(), 3);

    let reviewless = rows.iter().find(|r| r.name == "Школа №9").unwrap();
    assert_eq!(reviewless.review_count, 0);

    let hospital = rows.iter().find(|r| r.name == "Больница №1").unwrap();
    assert_eq!(hospital.declared_group.as_deref(), Some("Больницы"));
    assert_eq!(hospital.review_count, 2);
    assert!(hospital.sentiment.is_none());

    let school = rows.iter().find(|r| r.name == "Школа №7").unwrap();
    assert_eq!(school.declared_group.as_deref(), Some("Школы"));
    assert_eq!(school.review_count, 1);
}

#[tokio::test]
async fn export_with_sentiment_aggregates_ensemble() {
    let pool = init::init_in_memory().await.unwrap();
    seed_dataset(&pool).await;

    let rows = export::export_objects(&pool, true).await.unwrap();

    let school = rows.iter().find(|r| r.name == "Школа №7").unwrap();
    let summary = school.sentiment.as_ref().unwrap();
    assert_eq!(summary.positive, 1);
    assert_eq!(summary.dominant, Some(Sentiment::Positive));

    // One clearly positive and one clearly negative review: no dominant
    let hospital = rows.iter().find(|r| r.name == "Больница №1").unwrap();
    let summary = hospital.sentiment.as_ref().unwrap();
    assert_eq!(summary.positive, 1);
    assert_eq!(summary.negative, 1);
    assert_eq!(summary.dominant, None);
}

#[tokio::test]
async fn stats_count_by_group_and_method() {
    let pool = init::init_in_memory().await.unwrap();
    seed_dataset(&pool).await;

    let report = stats::collect_stats(&pool).await.unwrap();

    assert_eq!(report.objects_total, 3);
    assert_eq!(report.reviews_total, 3);
    assert_eq!(report.objects_by_declared_group.get("hospitals"), Some(&1));
    assert_eq!(report.objects_by_declared_group.get("schools"), Some(&2));

    let user_rating = report.sentiment_by_method.get("user_rating").unwrap();
    assert_eq!(user_rating.positive, 2);
    assert_eq!(user_rating.negative, 1);

    // FK constraints keep the dataset orphan-free
    assert_eq!(report.orphaned_reviews, 0);
}

#[tokio::test]
async fn stats_on_empty_dataset() {
    let pool = init::init_in_memory().await.unwrap();

    let report = stats::collect_stats(&pool).await.unwrap();
    assert_eq!(report.objects_total, 0);
    assert_eq!(report.reviews_total, 0);
    assert!(report.sentiment_by_method.is_empty());
    assert_eq!(report.orphaned_reviews, 0);
}
