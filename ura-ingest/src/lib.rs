//! ura-ingest library interface
//!
//! The reconciliation core for URA: object identity, group resolution,
//! the review ledger, the sentiment pipeline, and the batch orchestrator,
//! plus the read interfaces (export, stats) and the thin HTTP surface the
//! UI layer consumes.

pub mod api;
pub mod error;
pub mod export;
pub mod geocoder;
pub mod groups;
pub mod identity;
pub mod orchestrator;
pub mod records;
pub mod reviews;
pub mod sentiment;
pub mod stats;

pub use crate::error::{ApiError, ApiResult};

use crate::geocoder::{Geocoder, HttpGeocoder, NullGeocoder};
use crate::orchestrator::IngestOrchestrator;
use crate::sentiment::{LlmRemoteConfig, MethodRegistry, SentimentPipeline};
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use ura_common::config::{resolve_api_key, TomlConfig};
use ura_common::db::init::get_setting_or;
use ura_common::events::EventBus;
use ura_common::Result;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// The reconciliation orchestrator
    pub orchestrator: IngestOrchestrator,
    /// Root token cancelled on shutdown; batches get child tokens
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire up the full reconciliation stack from a pool and config
    pub async fn build(db: SqlitePool, config: &TomlConfig) -> Result<Self> {
        let capacity: usize = get_setting_or(&db, "event_bus_capacity", "100")
            .await?
            .parse()
            .unwrap_or(100);
        let event_bus = EventBus::new(capacity);

        let llm = match (
            resolve_api_key("URA_LLM_API_KEY", config.llm_api_key.as_deref()),
            config.llm_endpoint.clone(),
        ) {
            (Some(api_key), Some(endpoint)) => Some(LlmRemoteConfig { endpoint, api_key }),
            _ => None,
        };

        let registry = Arc::new(MethodRegistry::load(&db, llm).await?);

        let timeout_ms: u64 = get_setting_or(&db, "method_timeout_ms", "30000")
            .await?
            .parse()
            .unwrap_or(30_000);
        let pipeline = SentimentPipeline::new(
            db.clone(),
            registry,
            Duration::from_millis(timeout_ms),
        );

        let geocoder = build_geocoder(&db, config).await?;

        let orchestrator =
            IngestOrchestrator::new(db.clone(), pipeline, geocoder, event_bus.clone());

        Ok(Self {
            db,
            event_bus,
            orchestrator,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
        })
    }
}

/// Pick the geocoder implementation from configuration
///
/// Without an API key (or with geocoding disabled) the null geocoder runs
/// and every address resolves to NotFound, which ingestion treats as
/// non-fatal.
async fn build_geocoder(db: &SqlitePool, config: &TomlConfig) -> Result<Arc<dyn Geocoder>> {
    let enabled = get_setting_or(db, "geocoder_enabled", "true").await? == "true";
    let api_key = resolve_api_key("URA_GEOCODER_API_KEY", config.geocoder_api_key.as_deref());

    match (enabled, api_key) {
        (true, Some(api_key)) => {
            let rate_limit_ms: u64 = get_setting_or(db, "geocoder_rate_limit_ms", "1000")
                .await?
                .parse()
                .unwrap_or(1000);
            info!("HTTP geocoder configured");
            Ok(Arc::new(HttpGeocoder::new(
                HttpGeocoder::DEFAULT_BASE_URL,
                api_key,
                rate_limit_ms,
            )?))
        }
        _ => {
            info!("Geocoder disabled or no API key; objects keep record-supplied coordinates only");
            Ok(Arc::new(NullGeocoder))
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
