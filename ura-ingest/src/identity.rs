//! Object Identity Service
//!
//! Computes a stable content-addressed key for a physical object from its
//! normalized name and address, and resolves import rows to existing
//! objects or creates new ones. The same logical place always yields the
//! same object no matter how many times or in what formatting it is
//! imported.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use ura_common::{Error, Result};
use uuid::Uuid;

/// Separator between the normalized name and address inside the digest
/// input. Must never appear as a result of normalization itself.
const KEY_SEPARATOR: &str = "|";

/// Location attributes that may accompany a record (from the record itself
/// or from the geocoder). Merged into the object without overwriting
/// non-null existing values.
#[derive(Debug, Clone, Default)]
pub struct GeoHints {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub district: Option<String>,
}

impl GeoHints {
    pub fn is_empty(&self) -> bool {
        self.latitude.is_none() && self.longitude.is_none() && self.district.is_none()
    }
}

/// Result of resolving a record to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedObject {
    pub object_id: Uuid,
    /// True when this resolution created the row
    pub created: bool,
}

/// Case-fold, trim, and collapse internal whitespace
pub fn normalize_component(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the identity key for a (name, address) pair
///
/// The key is the first 128 bits of SHA-256 over the normalized
/// components, hex-encoded (32 chars). Rejects pairs where either
/// component normalizes to the empty string: a record without a usable
/// identity must be dropped, never assigned a random key.
pub fn identity_key(name: &str, address: &str) -> Result<String> {
    let norm_name = normalize_component(name);
    let norm_address = normalize_component(address);

    if norm_name.is_empty() {
        return Err(Error::InvalidIdentity("empty name".to_string()));
    }
    if norm_address.is_empty() {
        return Err(Error::InvalidIdentity("empty address".to_string()));
    }

    let mut hasher = Sha256::new();
    hasher.update(norm_name.as_bytes());
    hasher.update(KEY_SEPARATOR.as_bytes());
    hasher.update(norm_address.as_bytes());
    let digest = hasher.finalize();

    // 128-bit truncation keeps the key width of the legacy dataset while
    // using a well-reviewed digest
    let key = digest[..16]
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<String>();
    Ok(key)
}

/// Per-identity-key mutual exclusion registry
///
/// Two concurrent imports of the same logical object must serialize their
/// find-or-create, otherwise both can observe "absent" and race to insert.
/// The UNIQUE constraint on `identity_key` remains the last line of
/// defense; the loser of that race is retried as an update.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for one identity key
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("keyed lock registry poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Resolve a record to an object, creating or merging as needed
///
/// Callers must hold the [`KeyedLocks`] lock for `key` for the duration of
/// the enclosing transaction. Merge policy: previously-missing coordinates
/// and district are filled in; non-null existing values are never
/// overwritten by ingestion.
pub async fn resolve(
    conn: &mut SqliteConnection,
    key: &str,
    name: &str,
    address: &str,
    hints: &GeoHints,
) -> Result<ResolvedObject> {
    if let Some(object_id) = find_by_key(conn, key).await? {
        merge_attributes(conn, object_id, hints).await?;
        return Ok(ResolvedObject { object_id, created: false });
    }

    let object_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO objects (guid, identity_key, name, address, latitude, longitude, district)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(identity_key) DO NOTHING
        "#,
    )
    .bind(object_id.to_string())
    .bind(key)
    .bind(name.trim())
    .bind(address.trim())
    .bind(hints.latitude)
    .bind(hints.longitude)
    .bind(hints.district.as_deref())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 1 {
        debug!(identity_key = %key, object_id = %object_id, "Created object");
        return Ok(ResolvedObject { object_id, created: true });
    }

    // Lost an insert race despite the keyed lock (e.g. a concurrent writer
    // outside this process). Retry as an update.
    let object_id = find_by_key(conn, key).await?.ok_or_else(|| {
        Error::Integrity(format!("object with identity_key {} vanished during resolve", key))
    })?;
    merge_attributes(conn, object_id, hints).await?;
    Ok(ResolvedObject { object_id, created: false })
}

async fn find_by_key(conn: &mut SqliteConnection, key: &str) -> Result<Option<Uuid>> {
    let row = sqlx::query("SELECT guid FROM objects WHERE identity_key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            Ok(Some(Uuid::parse_str(&guid).map_err(|e| {
                Error::Internal(format!("malformed object guid {}: {}", guid, e))
            })?))
        }
        None => Ok(None),
    }
}

/// Fill previously-missing location attributes without overwriting
async fn merge_attributes(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    hints: &GeoHints,
) -> Result<()> {
    if hints.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE objects SET
            latitude = COALESCE(latitude, ?),
            longitude = COALESCE(longitude, ?),
            district = COALESCE(district, ?),
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(hints.latitude)
    .bind(hints.longitude)
    .bind(hints.district.as_deref())
    .bind(object_id.to_string())
    .execute(conn)
    .await?;

    Ok(())
}
