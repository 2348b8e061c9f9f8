//! Authorization: roles, permissions, attestation authorities.
//!
//! The role → permission matrix is a compiled-in constant, immutable at
//! runtime. Per-project actor grants and per-kind authorities live in the
//! store and change through the `rbac.*` Engine operations.

use sqlx::{Executor, Sqlite};

// ─── Permissions ──────────────────────────────────────────────────────────────

pub const PROJECT_READ: &str = "project.read";
pub const TASK_CREATE: &str = "task.create";
pub const TASK_UPDATE: &str = "task.update";
pub const TASK_CLAIM: &str = "task.claim";
pub const TASK_FORCE_DONE: &str = "task.force_done";
pub const ITERATION_WRITE: &str = "iteration.write";
pub const DECISION_CREATE: &str = "decision.create";
pub const ATTESTATION_CREATE: &str = "attestation.create";
pub const ATTESTATION_BYPASS: &str = "attestation.bypass";
pub const LEASE_ADMIN: &str = "lease.admin";
pub const RBAC_ADMIN: &str = "rbac.admin";

pub const ADMIN_ROLE: &str = "admin";

/// Seeded role → permission matrix. `admin` is `None` (every permission).
pub const ROLE_PERMISSIONS: &[(&str, Option<&[&str]>)] = &[
    ("admin", None),
    (
        "maintainer",
        Some(&[
            PROJECT_READ,
            TASK_CREATE,
            TASK_UPDATE,
            TASK_CLAIM,
            TASK_FORCE_DONE,
            ITERATION_WRITE,
            DECISION_CREATE,
            ATTESTATION_CREATE,
            LEASE_ADMIN,
        ]),
    ),
    (
        "contributor",
        Some(&[
            PROJECT_READ,
            TASK_CREATE,
            TASK_UPDATE,
            TASK_CLAIM,
            DECISION_CREATE,
            ATTESTATION_CREATE,
        ]),
    ),
    ("reviewer", Some(&[PROJECT_READ, ATTESTATION_CREATE])),
    ("observer", Some(&[PROJECT_READ])),
];

/// Every permission identifier, in matrix order — the `admin` expansion and
/// the `me/permissions` listing both use it.
pub const ALL_PERMISSIONS: &[&str] = &[
    PROJECT_READ,
    TASK_CREATE,
    TASK_UPDATE,
    TASK_CLAIM,
    TASK_FORCE_DONE,
    ITERATION_WRITE,
    DECISION_CREATE,
    ATTESTATION_CREATE,
    ATTESTATION_BYPASS,
    LEASE_ADMIN,
    RBAC_ADMIN,
];

pub fn role_exists(role: &str) -> bool {
    ROLE_PERMISSIONS.iter().any(|(r, _)| *r == role)
}

/// Whether `role` grants `permission` under the seeded matrix.
pub fn role_grants(role: &str, permission: &str) -> bool {
    for (entry_role, allowed) in ROLE_PERMISSIONS {
        if *entry_role != role {
            continue;
        }
        return match allowed {
            None => true,
            Some(perms) => perms.contains(&permission),
        };
    }
    false
}

/// The full permission set for a list of roles, in `ALL_PERMISSIONS` order.
pub fn permissions_for_roles(roles: &[String]) -> Vec<String> {
    ALL_PERMISSIONS
        .iter()
        .filter(|perm| roles.iter().any(|role| role_grants(role, perm)))
        .map(|perm| perm.to_string())
        .collect()
}

// ─── Store-backed checks ──────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorityRow {
    pub project_id: String,
    pub kind: String,
    pub role_id: String,
}

/// Roles granted to `(project, actor)`, sorted for stable output.
pub async fn roles_of(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    actor_id: &str,
) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT role_id FROM actor_roles WHERE project_id = ? AND actor_id = ? ORDER BY role_id",
    )
    .bind(project_id)
    .bind(actor_id)
    .fetch_all(ex)
    .await?;
    Ok(rows.into_iter().map(|(r,)| r).collect())
}

/// True iff any granted role for `(project, actor)` maps to `permission`.
pub async fn has_permission(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    actor_id: &str,
    permission: &str,
) -> sqlx::Result<bool> {
    let roles = roles_of(ex, project_id, actor_id).await?;
    Ok(roles.iter().any(|role| role_grants(role, permission)))
}

/// True iff the actor holds `attestation.bypass`, or some authority row for
/// `(project, kind)` names a role the actor has. Takes a connection because
/// it issues two queries.
pub async fn can_attest(
    conn: &mut sqlx::SqliteConnection,
    project_id: &str,
    actor_id: &str,
    kind: &str,
) -> sqlx::Result<bool> {
    let roles = roles_of(&mut *conn, project_id, actor_id).await?;
    if roles.iter().any(|role| role_grants(role, ATTESTATION_BYPASS)) {
        return Ok(true);
    }
    let authorized: Vec<(String,)> = sqlx::query_as(
        "SELECT role_id FROM attestation_authorities WHERE project_id = ? AND kind = ?",
    )
    .bind(project_id)
    .bind(kind)
    .fetch_all(&mut *conn)
    .await?;
    Ok(authorized
        .into_iter()
        .any(|(role,)| roles.contains(&role)))
}

// ─── Grant / revoke / authorities ─────────────────────────────────────────────

pub async fn grant_role(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    actor_id: &str,
    role_id: &str,
    granted_at: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO actor_roles (project_id, actor_id, role_id, granted_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(project_id, actor_id, role_id) DO NOTHING",
    )
    .bind(project_id)
    .bind(actor_id)
    .bind(role_id)
    .bind(granted_at)
    .execute(ex)
    .await?;
    Ok(())
}

/// Returns true when a grant actually existed.
pub async fn revoke_role(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    actor_id: &str,
    role_id: &str,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "DELETE FROM actor_roles WHERE project_id = ? AND actor_id = ? AND role_id = ?",
    )
    .bind(project_id)
    .bind(actor_id)
    .bind(role_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_authority(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    kind: &str,
    role_id: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO attestation_authorities (project_id, kind, role_id) VALUES (?, ?, ?)
         ON CONFLICT(project_id, kind, role_id) DO NOTHING",
    )
    .bind(project_id)
    .bind(kind)
    .bind(role_id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn list_authorities(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
) -> sqlx::Result<Vec<AuthorityRow>> {
    sqlx::query_as(
        "SELECT * FROM attestation_authorities WHERE project_id = ? ORDER BY kind, role_id",
    )
    .bind(project_id)
    .fetch_all(ex)
    .await
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;

    #[test]
    fn admin_has_everything() {
        for perm in ALL_PERMISSIONS {
            assert!(role_grants("admin", perm), "admin missing {perm}");
        }
    }

    #[test]
    fn observer_reads_only() {
        assert!(role_grants("observer", PROJECT_READ));
        assert!(!role_grants("observer", TASK_CREATE));
        assert!(!role_grants("observer", RBAC_ADMIN));
    }

    #[test]
    fn unknown_role_grants_nothing() {
        assert!(!role_grants("intruder", PROJECT_READ));
        assert!(!role_exists("intruder"));
    }

    #[test]
    fn permissions_for_roles_union_is_ordered() {
        let perms =
            permissions_for_roles(&["reviewer".to_string(), "observer".to_string()]);
        assert_eq!(perms, vec![PROJECT_READ.to_string(), ATTESTATION_CREATE.to_string()]);
    }

    async fn seeded() -> Storage {
        let storage = Storage::open_in_memory().await.unwrap();
        let mut tx = storage.begin_write().await.unwrap();
        crate::store::insert_project(
            &mut *tx,
            &crate::store::ProjectRow {
                id: "p1".into(),
                kind: "software".into(),
                status: "active".into(),
                description: String::new(),
                config: "{}".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn has_permission_follows_grants() {
        let storage = seeded().await;
        let mut tx = storage.begin_write().await.unwrap();
        grant_role(&mut *tx, "p1", "alice", "contributor", "2026-01-01T00:00:00Z")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(has_permission(storage.reader(), "p1", "alice", TASK_CREATE)
            .await
            .unwrap());
        assert!(!has_permission(storage.reader(), "p1", "alice", RBAC_ADMIN)
            .await
            .unwrap());
        assert!(!has_permission(storage.reader(), "p1", "intruder", TASK_CREATE)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn can_attest_requires_authority_or_bypass() {
        let storage = seeded().await;
        let mut tx = storage.begin_write().await.unwrap();
        grant_role(&mut *tx, "p1", "rev", "reviewer", "2026-01-01T00:00:00Z")
            .await
            .unwrap();
        grant_role(&mut *tx, "p1", "boss", "admin", "2026-01-01T00:00:00Z")
            .await
            .unwrap();
        set_authority(&mut *tx, "p1", "review.approved", "reviewer")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut conn = storage.reader().acquire().await.unwrap();
        assert!(can_attest(&mut conn, "p1", "rev", "review.approved")
            .await
            .unwrap());
        // No authority row for security.ok → reviewer may not assert it.
        assert!(!can_attest(&mut conn, "p1", "rev", "security.ok")
            .await
            .unwrap());
        // Bypass wins regardless of authority rows.
        assert!(can_attest(&mut conn, "p1", "boss", "security.ok")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn revoke_removes_grant() {
        let storage = seeded().await;
        let mut tx = storage.begin_write().await.unwrap();
        grant_role(&mut *tx, "p1", "alice", "observer", "2026-01-01T00:00:00Z")
            .await
            .unwrap();
        assert!(revoke_role(&mut *tx, "p1", "alice", "observer").await.unwrap());
        assert!(!revoke_role(&mut *tx, "p1", "alice", "observer").await.unwrap());
        tx.commit().await.unwrap();

        assert!(!has_permission(storage.reader(), "p1", "alice", PROJECT_READ)
            .await
            .unwrap());
    }
}
