//! Group Resolver
//!
//! Assigns at most one declared group and at most one detected group to an
//! object. Declared assignment is last-write-wins; detected assignment
//! follows a confidence-max policy. The group vocabulary is open: an
//! unrecognized group_type creates the row on the fly and is logged for
//! later curation.

use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};
use ura_common::{Error, Result};
use uuid::Uuid;

/// Assign a supplier-declared group to an object
///
/// Always replaces the current declared group (last-write-wins per
/// ingestion batch). The orchestrator skips this call entirely when the
/// record carries no declared group, so existing data is not wiped by
/// group-less records.
pub async fn assign_declared(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    group_type: &str,
) -> Result<()> {
    let group_id = ensure_declared_group(conn, group_type).await?;

    sqlx::query(
        "UPDATE objects SET declared_group_id = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(group_id.to_string())
    .bind(object_id.to_string())
    .execute(conn)
    .await?;

    debug!(object_id = %object_id, group_type = %group_type, "Assigned declared group");
    Ok(())
}

/// Assign an algorithm-detected group to an object
///
/// Confidence-max policy: assign when the object has no detected group;
/// replace only when the new confidence is strictly greater than the
/// incumbent's. Ties keep the existing assignment to avoid flapping
/// between detections of equal strength.
pub async fn assign_detected(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    group_type: &str,
    method: &str,
    confidence: f64,
) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::Validation(format!(
            "detected-group confidence {} outside [0,1]",
            confidence
        )));
    }

    let current_confidence: Option<f64> =
        sqlx::query_scalar("SELECT detected_confidence FROM objects WHERE guid = ?")
            .bind(object_id.to_string())
            .fetch_one(&mut *conn)
            .await?;

    if let Some(current_confidence) = current_confidence {
        if confidence <= current_confidence {
            debug!(
                object_id = %object_id,
                group_type = %group_type,
                confidence,
                current_confidence,
                "Keeping incumbent detected group"
            );
            return Ok(());
        }
    }

    let group_id = ensure_detected_group(conn, group_type, method, confidence).await?;

    sqlx::query(
        r#"
        UPDATE objects SET
            detected_group_id = ?,
            detected_confidence = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(group_id.to_string())
    .bind(confidence)
    .bind(object_id.to_string())
    .execute(conn)
    .await?;

    debug!(object_id = %object_id, group_type = %group_type, confidence, "Assigned detected group");
    Ok(())
}

/// Find or create a declared group by type
pub async fn ensure_declared_group(
    conn: &mut SqliteConnection,
    group_type: &str,
) -> Result<Uuid> {
    if let Some(id) = lookup_group(conn, "declared_groups", group_type).await? {
        return Ok(id);
    }

    warn!(group_type = %group_type, "Unrecognized declared group type, creating on the fly");

    let guid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO declared_groups (guid, group_type, group_name)
        VALUES (?, ?, ?)
        ON CONFLICT(group_type) DO NOTHING
        "#,
    )
    .bind(guid.to_string())
    .bind(group_type)
    .bind(group_type)
    .execute(&mut *conn)
    .await?;

    // A concurrent writer may have created it; the lookup is authoritative
    lookup_group(conn, "declared_groups", group_type)
        .await?
        .ok_or_else(|| Error::Integrity(format!("declared group {} vanished", group_type)))
}

/// Find or create a detected group by type
pub async fn ensure_detected_group(
    conn: &mut SqliteConnection,
    group_type: &str,
    method: &str,
    confidence: f64,
) -> Result<Uuid> {
    if let Some(id) = lookup_group(conn, "detected_groups", group_type).await? {
        return Ok(id);
    }

    warn!(group_type = %group_type, method = %method, "Unrecognized detected group type, creating on the fly");

    let guid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO detected_groups (guid, group_type, group_name, detection_method, confidence)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(group_type) DO NOTHING
        "#,
    )
    .bind(guid.to_string())
    .bind(group_type)
    .bind(group_type)
    .bind(method)
    .bind(confidence)
    .execute(&mut *conn)
    .await?;

    lookup_group(conn, "detected_groups", group_type)
        .await?
        .ok_or_else(|| Error::Integrity(format!("detected group {} vanished", group_type)))
}

async fn lookup_group(
    conn: &mut SqliteConnection,
    table: &str,
    group_type: &str,
) -> Result<Option<Uuid>> {
    // `table` is a compile-time constant at every call site
    let sql = format!("SELECT guid FROM {} WHERE group_type = ?", table);
    let row = sqlx::query(&sql)
        .bind(group_type)
        .fetch_optional(conn)
        .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            Ok(Some(Uuid::parse_str(&guid).map_err(|e| {
                Error::Internal(format!("malformed group guid {}: {}", guid, e))
            })?))
        }
        None => Ok(None),
    }
}
