//! HTTP API for the UI/export layer
//!
//! The map UI and any export tooling consume these endpoints; the
//! reconciliation core itself never depends on them.

use crate::error::{ApiError, ApiResult};
use crate::export::{export_objects, ExportRow};
use crate::orchestrator::BatchReport;
use crate::records::RawRecord;
use crate::sentiment::{ensemble_for_review, results_for_review, EnsembleSentiment};
use crate::stats::{collect_stats, StatsReport};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tracing::info;

/// All API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/export/objects", get(export))
        .route("/stats", get(stats))
        .route("/reviews/:review_id/analysis", get(review_analysis))
        .route("/events", get(event_stream))
}

/// Health check
async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // A trivial query doubles as a liveness probe for the store
    let ok: i64 = sqlx::query_scalar("SELECT 1")
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "status": if ok == 1 { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": (chrono::Utc::now() - state.startup_time).num_seconds(),
    })))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    records: Vec<RawRecord>,
}

/// Ingest a batch of normalized records
///
/// Returns the batch report; record-level failures are inside the report,
/// never an HTTP error.
async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<BatchReport>> {
    if request.records.is_empty() {
        return Err(ApiError::BadRequest("empty batch".to_string()));
    }

    info!(records = request.records.len(), "Ingest request received");
    let report = state
        .orchestrator
        .ingest_batch(request.records, state.shutdown.child_token())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    #[serde(default)]
    sentiment: bool,
}

/// Flattened object export
async fn export(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Json<Vec<ExportRow>>> {
    let rows = export_objects(&state.db, params.sentiment).await?;
    Ok(Json(rows))
}

/// Dataset statistics
async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsReport>> {
    let report = collect_stats(&state.db).await?;
    Ok(Json(report))
}

/// Per-method results and the ensemble verdict for one review
async fn review_analysis(
    State(state): State<AppState>,
    Path(review_id): Path<uuid::Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM reviews WHERE guid = ?)")
        .bind(review_id.to_string())
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !exists {
        return Err(ApiError::NotFound(format!("review {}", review_id)));
    }

    let results = results_for_review(&state.db, review_id).await?;
    let ensemble = match ensemble_for_review(&state.db, review_id).await? {
        EnsembleSentiment::Known { sentiment, score } => json!({
            "sentiment": sentiment,
            "score": score,
        }),
        EnsembleSentiment::Unknown => json!({ "sentiment": "unknown" }),
    };

    Ok(Json(json!({
        "review_id": review_id,
        "results": results,
        "ensemble": ensemble,
    })))
}

/// SSE stream of ingest events
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to ingest events");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(payload) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event("IngestEvent").data(payload));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    yield Ok(Event::default()
                        .event("Lagged")
                        .data(skipped.to_string()));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("heartbeat"),
    )
}
