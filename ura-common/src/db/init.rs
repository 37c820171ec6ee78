//! Database initialization
//!
//! Creates the connection pool, the six core relations plus the settings
//! table, seeds the group vocabulary and the method registry, and ensures
//! runtime-tunable settings exist with defaults. All steps are idempotent
//! and safe to run on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Known group vocabulary, seeded into both group tables on first run.
/// The vocabulary stays open: unrecognized types are created on the fly
/// by the group resolver.
const GROUP_VOCABULARY: &[(&str, &str)] = &[
    ("hospitals", "Больницы"),
    ("schools", "Школы"),
    ("kindergartens", "Детские сады"),
    ("polyclinics", "Поликлиники"),
    ("pharmacies", "Аптеки"),
    ("shopping_malls", "Торговые центры"),
    ("universities", "Университеты"),
];

/// Built-in sentiment methods: (name, description, trust_rank, active)
const METHOD_SEED: &[(&str, &str, i64, bool)] = &[
    (
        "user_rating",
        "Sentiment derived from the star rating supplied with the review",
        1,
        true,
    ),
    (
        "lexicon_rule",
        "Keyword-dictionary sentiment and review-type classification",
        2,
        true,
    ),
    (
        "llm_remote",
        "Remote LLM completion endpoint; requires a configured API key",
        3,
        false,
    ),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_pragmas(&pool).await?;
    create_schema(&pool).await?;
    seed_group_vocabulary(&pool).await?;
    seed_methods(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Apply connection pragmas: foreign keys, WAL, busy timeout
///
/// WAL allows concurrent readers with one writer, which matters during
/// parallel batch ingestion.
pub async fn configure_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_declared_groups_table(pool).await?;
    create_detected_groups_table(pool).await?;
    create_objects_table(pool).await?;
    create_reviews_table(pool).await?;
    create_methods_table(pool).await?;
    create_analysis_results_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores runtime-tunable key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the declared_groups table
///
/// Supplier-declared categories. `group_type` is the stable machine tag;
/// `group_name` is the display name.
pub async fn create_declared_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS declared_groups (
            guid TEXT PRIMARY KEY,
            group_type TEXT NOT NULL UNIQUE,
            group_name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the detected_groups table
///
/// Algorithm-detected categories carry detection provenance and a
/// confidence in [0,1].
pub async fn create_detected_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detected_groups (
            guid TEXT PRIMARY KEY,
            group_type TEXT NOT NULL UNIQUE,
            group_name TEXT NOT NULL,
            detection_method TEXT NOT NULL DEFAULT 'auto',
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (confidence >= 0.0 AND confidence <= 1.0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the objects table
///
/// One row per physical place. `identity_key` is the deterministic digest
/// of normalized (name, address); its UNIQUE constraint is the last line
/// of defense against concurrent duplicate creation. Group links are
/// single nullable FKs: an object references at most one declared and at
/// most one detected group, and re-assignment replaces the reference.
/// `detected_confidence` is the confidence of this object's detected
/// assignment; the confidence-max policy compares against it.
pub async fn create_objects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS objects (
            guid TEXT PRIMARY KEY,
            identity_key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            district TEXT,
            declared_group_id TEXT REFERENCES declared_groups(guid),
            detected_group_id TEXT REFERENCES detected_groups(guid),
            detected_confidence REAL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (length(identity_key) = 32),
            CHECK ((detected_group_id IS NULL) = (detected_confidence IS NULL)),
            CHECK (detected_confidence IS NULL OR (detected_confidence >= 0.0 AND detected_confidence <= 1.0)),
            CHECK (latitude IS NULL OR (latitude >= -90.0 AND latitude <= 90.0)),
            CHECK (longitude IS NULL OR (longitude >= -180.0 AND longitude <= 180.0))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_identity_key ON objects(identity_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_declared_group ON objects(declared_group_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_district ON objects(district)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the reviews table
///
/// `(source, external_id)` is unique: re-importing the same provider
/// review updates it in place. A review belongs to exactly one object.
pub async fn create_reviews_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reviews (
            guid TEXT PRIMARY KEY,
            object_id TEXT NOT NULL REFERENCES objects(guid) ON DELETE CASCADE,
            text TEXT NOT NULL,
            rating INTEGER,
            review_date TEXT,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (source, external_id),
            CHECK (rating IS NULL OR (rating >= 1 AND rating <= 5))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_object ON reviews(object_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_source ON reviews(source, external_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the methods table
pub async fn create_methods_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS methods (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            trust_rank INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (trust_rank >= 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the analysis_results table
///
/// `(review_id, method_id)` is unique: re-running a method on a review
/// overwrites the prior result. Failed runs are stored with NULL sentiment
/// and the error text so re-runs are observable.
pub async fn create_analysis_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            guid TEXT PRIMARY KEY,
            review_id TEXT NOT NULL REFERENCES reviews(guid) ON DELETE CASCADE,
            method_id TEXT NOT NULL REFERENCES methods(guid) ON DELETE CASCADE,
            status TEXT NOT NULL CHECK (status IN ('completed', 'failed')),
            sentiment TEXT CHECK (sentiment IS NULL OR sentiment IN ('positive', 'negative', 'neutral')),
            confidence REAL CHECK (confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
            review_type TEXT CHECK (review_type IS NULL OR review_type IN ('gratitude', 'complaint', 'suggestion', 'informational')),
            keywords TEXT NOT NULL DEFAULT '[]',
            topics TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            processed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (review_id, method_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_results_review ON analysis_results(review_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_results_method ON analysis_results(method_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Seed the known group vocabulary into both group tables
async fn seed_group_vocabulary(pool: &SqlitePool) -> Result<()> {
    for &(group_type, group_name) in GROUP_VOCABULARY {
        sqlx::query(
            "INSERT OR IGNORE INTO declared_groups (guid, group_type, group_name) VALUES (?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(group_type)
        .bind(group_name)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO detected_groups (guid, group_type, group_name, detection_method, confidence)
            VALUES (?, ?, ?, 'seed', 1.0)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(group_type)
        .bind(group_name)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Seed the built-in sentiment methods
async fn seed_methods(pool: &SqlitePool) -> Result<()> {
    for &(name, description, trust_rank, active) in METHOD_SEED {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO methods (guid, name, description, trust_rank, is_active)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .bind(trust_rank)
        .bind(active as i64)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values; NULL values
/// are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Ingestion settings
    ensure_setting(pool, "ingest_max_concurrent_records", "4").await?;

    // Sentiment pipeline settings
    ensure_setting(pool, "method_timeout_ms", "30000").await?;

    // Geocoder settings
    ensure_setting(pool, "geocoder_rate_limit_ms", "1000").await?;
    ensure_setting(pool, "geocoder_enabled", "true").await?;

    // HTTP server settings
    ensure_setting(pool, "http_port", "5810").await?;
    ensure_setting(pool, "event_bus_capacity", "100").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races:
        // multiple connections may pass the exists check simultaneously
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Read a setting, falling back to the provided default when missing
pub async fn get_setting_or(pool: &SqlitePool, key: &str, default: &str) -> Result<String> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?
        .flatten();

    Ok(value.unwrap_or_else(|| default.to_string()))
}

/// Create an in-memory pool with the full schema and seeds, for tests
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;
    seed_group_vocabulary(&pool).await?;
    seed_methods(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}
