//! Exclusive work leases.
//!
//! At most one row per task; a lease is active while `expires_at > now`.
//! Expiry is passive — an expired row is overwritable by any claimer and
//! invisible to ownership checks. All mutations run inside the caller's
//! write transaction, so two concurrent claimers serialize and exactly one
//! wins.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use crate::error::{EngineError, EngineResult};
use crate::model::Lease;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeaseRow {
    pub task_id: String,
    pub owner_id: String,
    pub acquired_at: String,
    pub expires_at: String,
}

impl LeaseRow {
    pub fn into_lease(self) -> Lease {
        Lease {
            task_id: self.task_id,
            owner_id: self.owner_id,
            acquired_at: self.acquired_at,
            expires_at: self.expires_at,
        }
    }

    /// Active means unexpired at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expires) => expires.with_timezone(&Utc) > now,
            Err(_) => false,
        }
    }
}

/// How a successful claim resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Acquired,
    Renewed,
}

pub async fn get_lease(
    ex: impl Executor<'_, Database = Sqlite>,
    task_id: &str,
) -> sqlx::Result<Option<LeaseRow>> {
    sqlx::query_as("SELECT * FROM leases WHERE task_id = ?")
        .bind(task_id)
        .fetch_optional(ex)
        .await
}

/// The lease currently in force for `task_id`, if any.
pub async fn active_lease(
    ex: impl Executor<'_, Database = Sqlite>,
    task_id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<Option<LeaseRow>> {
    Ok(get_lease(ex, task_id).await?.filter(|l| l.is_active(now)))
}

/// Claim or renew the lease on `task_id` for `actor_id`.
///
/// - no lease, or an expired one → overwrite: `Acquired`.
/// - caller already owns the active lease → extend: `Renewed`.
/// - someone else owns it → `lease_conflict`.
pub async fn claim(
    conn: &mut SqliteConnection,
    task_id: &str,
    actor_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> EngineResult<(LeaseRow, ClaimOutcome)> {
    let current = get_lease(&mut *conn, task_id).await?;
    let outcome = match &current {
        Some(lease) if lease.is_active(now) => {
            if lease.owner_id != actor_id {
                return Err(EngineError::LeaseConflict {
                    task_id: task_id.to_string(),
                    owner_id: lease.owner_id.clone(),
                });
            }
            ClaimOutcome::Renewed
        }
        _ => ClaimOutcome::Acquired,
    };

    let acquired_at = match (&outcome, &current) {
        // Renewal keeps the original acquisition time.
        (ClaimOutcome::Renewed, Some(lease)) => lease.acquired_at.clone(),
        _ => now.to_rfc3339(),
    };
    let row = LeaseRow {
        task_id: task_id.to_string(),
        owner_id: actor_id.to_string(),
        acquired_at,
        expires_at: (now + ttl).to_rfc3339(),
    };
    sqlx::query(
        "INSERT INTO leases (task_id, owner_id, acquired_at, expires_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(task_id) DO UPDATE SET
           owner_id = excluded.owner_id,
           acquired_at = excluded.acquired_at,
           expires_at = excluded.expires_at",
    )
    .bind(&row.task_id)
    .bind(&row.owner_id)
    .bind(&row.acquired_at)
    .bind(&row.expires_at)
    .execute(&mut *conn)
    .await?;

    Ok((row, outcome))
}

/// Delete the lease row; true when one existed.
pub async fn delete_lease(
    ex: impl Executor<'_, Database = Sqlite>,
    task_id: &str,
) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM leases WHERE task_id = ?")
        .bind(task_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every expired lease row, returning the removed rows so the caller
/// can journal `lease.expired` for each. Used by the optional sweep.
pub async fn sweep_expired(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> sqlx::Result<Vec<LeaseRow>> {
    let now_str = now.to_rfc3339();
    let expired: Vec<LeaseRow> = sqlx::query_as("SELECT * FROM leases WHERE expires_at <= ?")
        .bind(&now_str)
        .fetch_all(&mut *conn)
        .await?;
    if !expired.is_empty() {
        sqlx::query("DELETE FROM leases WHERE expires_at <= ?")
            .bind(&now_str)
            .execute(&mut *conn)
            .await?;
    }
    Ok(expired)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
