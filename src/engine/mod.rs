//! The Engine: single in-process authority over every mutation.
//!
//! Each mutating operation follows the same discipline: begin a serialized
//! write transaction, authorize, read current state, validate
//! preconditions, write, append journal events, commit. Any failure aborts
//! the transaction whole — the journal and the state change land together
//! or not at all. Read operations run against the read pool and observe
//! committed state only.
//!
//! Task operations live in `tasks.rs`; everything else is here.

mod tasks;

pub use tasks::{CreateTaskRequest, TaskTreeNode, UpdateTaskRequest};

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Sqlite, Transaction};
use tracing::warn;

use crate::auth;
use crate::clock::SharedClock;
use crate::config::{EngineSettings, ProjectConfig};
use crate::error::{EngineError, EngineResult};
use crate::lease;
use crate::model::{
    new_id, Attestation, Decision, EntityKind, Event, Iteration, IterationStatus, Project,
};
use crate::store::{self, event_log, Page, Storage};

#[derive(Clone)]
pub struct Engine {
    store: Storage,
    clock: SharedClock,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(store: Storage, clock: SharedClock, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Storage {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }

    // ─── Internal helpers ─────────────────────────────────────────────────────

    pub(crate) async fn begin(&self) -> EngineResult<Transaction<'static, Sqlite>> {
        self.store.begin_write().await
    }

    /// Load a project row and its config document inside the transaction.
    pub(crate) async fn load_project(
        &self,
        conn: &mut sqlx::SqliteConnection,
        project_id: &str,
    ) -> EngineResult<(store::ProjectRow, ProjectConfig)> {
        let row = store::get_project(&mut *conn, project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))?;
        let config: ProjectConfig = serde_json::from_str(&row.config)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("corrupt project config: {e}")))?;
        Ok((row, config))
    }

    /// Require `permission` for `(project, actor)` or fail `forbidden`.
    pub(crate) async fn authorize(
        &self,
        conn: &mut sqlx::SqliteConnection,
        project_id: &str,
        actor_id: &str,
        permission: &str,
    ) -> EngineResult<()> {
        if auth::has_permission(&mut *conn, project_id, actor_id, permission).await? {
            Ok(())
        } else {
            Err(EngineError::Forbidden {
                actor: actor_id.to_string(),
                permission: permission.to_string(),
            })
        }
    }

    /// Journal an `auth.denied` event for a forbidden outcome. Runs in its
    /// own transaction after the aborted one is gone — the denial must
    /// survive even though the mutation did not.
    pub(crate) async fn journal_denial<T>(
        &self,
        result: EngineResult<T>,
        project_id: &str,
        actor_id: &str,
    ) -> EngineResult<T> {
        let payload = match &result {
            Err(EngineError::Forbidden { permission, .. }) => {
                json!({ "permission": permission })
            }
            Err(EngineError::ForbiddenAttestationKind { kind, .. }) => {
                json!({ "kind": kind })
            }
            _ => return result,
        };
        let append = async {
            let mut tx = self.begin().await?;
            event_log::append(
                &mut *tx,
                &self.clock.now_rfc3339(),
                &event_log::NewEvent {
                    event_type: "auth.denied",
                    project_id,
                    entity_kind: "rbac",
                    entity_id: actor_id,
                    actor_id,
                    payload,
                },
            )
            .await?;
            tx.commit().await?;
            Ok::<_, EngineError>(())
        };
        if let Err(e) = append.await {
            warn!(project = project_id, actor = actor_id, err = %e, "failed to journal auth denial");
        }
        result
    }

    // ─── Projects ─────────────────────────────────────────────────────────────

    /// Create a project seeded with `config`, granting the initializing
    /// actor (and the built-in `tester` actor) the admin role.
    pub async fn init_project(
        &self,
        actor_id: &str,
        config: ProjectConfig,
        description: &str,
    ) -> EngineResult<Project> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(EngineError::bad_request(format!(
                "invalid project config: {}",
                problems.join("; ")
            )));
        }

        let project_id = config.project.id.clone();
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;

        if store::get_project(&mut *tx, &project_id).await?.is_some() {
            return Err(EngineError::Conflict {
                message: format!("project already exists: {project_id}"),
            });
        }

        let row = store::ProjectRow {
            id: project_id.clone(),
            kind: config.project.kind.clone(),
            status: "active".to_string(),
            description: description.to_string(),
            config: serde_json::to_string(&config)
                .map_err(|e| EngineError::Internal(e.into()))?,
            created_at: now.clone(),
        };
        store::insert_project(&mut *tx, &row).await?;

        let mut admins = vec![actor_id.to_string()];
        if actor_id != "tester" {
            admins.push("tester".to_string());
        }
        for admin in &admins {
            auth::grant_role(&mut *tx, &project_id, admin, auth::ADMIN_ROLE, &now).await?;
        }

        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "project.created",
                project_id: &project_id,
                entity_kind: "project",
                entity_id: &project_id,
                actor_id,
                payload: json!({ "kind": row.kind }),
            },
        )
        .await?;
        for admin in &admins {
            event_log::append(
                &mut *tx,
                &now,
                &event_log::NewEvent {
                    event_type: "rbac.role.granted",
                    project_id: &project_id,
                    entity_kind: "rbac",
                    entity_id: admin,
                    actor_id,
                    payload: json!({ "role": auth::ADMIN_ROLE }),
                },
            )
            .await?;
        }
        tx.commit().await?;

        Ok(row.into_project())
    }

    pub async fn get_project(&self, project_id: &str) -> EngineResult<Project> {
        let row = store::get_project(self.store.reader(), project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))?;
        Ok(row.into_project())
    }

    pub async fn list_projects(
        &self,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> EngineResult<Page<Project>> {
        let limit = store::clamp_limit(limit);
        let cursor = decode_opt_cursor(cursor)?;
        let rows = store::list_projects(self.store.reader(), cursor, limit + 1).await?;
        Ok(paginate(rows, limit, |r| {
            (r.created_at.clone(), r.id.clone())
        })
        .map_items(|r| r.into_project()))
    }

    /// The project's config document, rendered as JSON.
    pub async fn get_config(&self, project_id: &str) -> EngineResult<Value> {
        let row = store::get_project(self.store.reader(), project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))?;
        serde_json::from_str(&row.config)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("corrupt project config: {e}")))
    }

    // ─── Iterations ───────────────────────────────────────────────────────────

    pub async fn create_iteration(
        &self,
        actor_id: &str,
        project_id: &str,
        id: Option<String>,
        goal: &str,
    ) -> EngineResult<Iteration> {
        let result = self
            .create_iteration_inner(actor_id, project_id, id, goal)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn create_iteration_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        id: Option<String>,
        goal: &str,
    ) -> EngineResult<Iteration> {
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::ITERATION_WRITE)
            .await?;

        let id = id.unwrap_or_else(new_id);
        if store::get_iteration(&mut *tx, project_id, &id).await?.is_some() {
            return Err(EngineError::Conflict {
                message: format!("iteration already exists: {id}"),
            });
        }
        let row = store::IterationRow {
            id: id.clone(),
            project_id: project_id.to_string(),
            goal: goal.to_string(),
            status: IterationStatus::Pending.as_str().to_string(),
            created_at: now.clone(),
        };
        store::insert_iteration(&mut *tx, &row).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "iteration.created",
                project_id,
                entity_kind: "iteration",
                entity_id: &id,
                actor_id,
                payload: json!({ "goal": goal }),
            },
        )
        .await?;
        tx.commit().await?;
        row.into_iteration()
    }

    pub async fn set_iteration_status(
        &self,
        actor_id: &str,
        project_id: &str,
        iteration_id: &str,
        to: IterationStatus,
    ) -> EngineResult<Iteration> {
        let result = self
            .set_iteration_status_inner(actor_id, project_id, iteration_id, to)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn set_iteration_status_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        iteration_id: &str,
        to: IterationStatus,
    ) -> EngineResult<Iteration> {
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        let (_, config) = self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::ITERATION_WRITE)
            .await?;

        let row = store::get_iteration(&mut *tx, project_id, iteration_id)
            .await?
            .ok_or_else(|| EngineError::not_found("iteration", iteration_id))?;
        let from = row.clone().into_iteration()?.status;

        if !crate::model::iteration_transition_allowed(from, to) {
            return Err(EngineError::InvalidTransition {
                entity: "iteration",
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        if to == IterationStatus::Validated {
            if let Some(required) = config.iteration_required_kind() {
                let kinds =
                    store::kinds_for_entity(&mut *tx, "iteration", iteration_id).await?;
                let satisfied = kinds.iter().any(|k| k == required);
                event_log::append(
                    &mut *tx,
                    &now,
                    &event_log::NewEvent {
                        event_type: "iteration.validation.checked",
                        project_id,
                        entity_kind: "iteration",
                        entity_id: iteration_id,
                        actor_id,
                        payload: json!({ "required": required, "satisfied": satisfied }),
                    },
                )
                .await?;
                if !satisfied {
                    return Err(EngineError::validation_failed(
                        format!("iteration requires attestation {required}"),
                        Some(json!({ "missing": [required] })),
                    ));
                }
            }
        }

        store::update_iteration_status(&mut *tx, iteration_id, to.as_str()).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "iteration.status.changed",
                project_id,
                entity_kind: "iteration",
                entity_id: iteration_id,
                actor_id,
                payload: json!({ "from": from.as_str(), "to": to.as_str() }),
            },
        )
        .await?;
        tx.commit().await?;

        let mut updated = row;
        updated.status = to.as_str().to_string();
        updated.into_iteration()
    }

    pub async fn list_iterations(
        &self,
        project_id: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> EngineResult<Page<Iteration>> {
        self.get_project(project_id).await?;
        let limit = store::clamp_limit(limit);
        let cursor = decode_opt_cursor(cursor)?;
        let rows =
            store::list_iterations(self.store.reader(), project_id, cursor, limit + 1).await?;
        paginate(rows, limit, |r| (r.created_at.clone(), r.id.clone()))
            .try_map_items(|r| r.into_iteration())
    }

    // ─── Decisions ────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_decision(
        &self,
        actor_id: &str,
        project_id: &str,
        id: Option<String>,
        title: &str,
        decision: &str,
        context: Value,
        rationale: Vec<String>,
        alternatives: Vec<String>,
    ) -> EngineResult<Decision> {
        let result = self
            .create_decision_inner(
                actor_id,
                project_id,
                id,
                title,
                decision,
                context,
                rationale,
                alternatives,
            )
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_decision_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        id: Option<String>,
        title: &str,
        decision: &str,
        context: Value,
        rationale: Vec<String>,
        alternatives: Vec<String>,
    ) -> EngineResult<Decision> {
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::DECISION_CREATE)
            .await?;

        let id = id.unwrap_or_else(new_id);
        if store::get_decision(&mut *tx, project_id, &id).await?.is_some() {
            return Err(EngineError::Conflict {
                message: format!("decision already exists: {id}"),
            });
        }
        let row = store::DecisionRow {
            id: id.clone(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            decision: decision.to_string(),
            decider_id: actor_id.to_string(),
            context: context.to_string(),
            rationale: serde_json::to_string(&rationale)
                .map_err(|e| EngineError::Internal(e.into()))?,
            alternatives: serde_json::to_string(&alternatives)
                .map_err(|e| EngineError::Internal(e.into()))?,
            created_at: now.clone(),
        };
        store::insert_decision(&mut *tx, &row).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "decision.created",
                project_id,
                entity_kind: "decision",
                entity_id: &id,
                actor_id,
                payload: json!({ "title": title }),
            },
        )
        .await?;
        tx.commit().await?;
        row.into_decision()
    }

    pub async fn list_decisions(
        &self,
        project_id: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> EngineResult<Page<Decision>> {
        self.get_project(project_id).await?;
        let limit = store::clamp_limit(limit);
        let cursor = decode_opt_cursor(cursor)?;
        let rows =
            store::list_decisions(self.store.reader(), project_id, cursor, limit + 1).await?;
        paginate(rows, limit, |r| (r.created_at.clone(), r.id.clone()))
            .try_map_items(|r| r.into_decision())
    }

    // ─── Attestations ─────────────────────────────────────────────────────────

    pub async fn create_attestation(
        &self,
        actor_id: &str,
        project_id: &str,
        entity_kind: EntityKind,
        entity_id: &str,
        kind: &str,
        payload: Value,
    ) -> EngineResult<Attestation> {
        let result = self
            .create_attestation_inner(actor_id, project_id, entity_kind, entity_id, kind, payload)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn create_attestation_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        entity_kind: EntityKind,
        entity_id: &str,
        kind: &str,
        payload: Value,
    ) -> EngineResult<Attestation> {
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        let (_, config) = self.load_project(&mut tx, project_id).await?;

        if !config.attestations.catalog.contains_key(kind) {
            return Err(EngineError::bad_field(
                "kind",
                format!("unknown attestation kind: {kind}"),
            ));
        }

        let exists = match entity_kind {
            EntityKind::Project => entity_id == project_id,
            EntityKind::Iteration => store::get_iteration(&mut *tx, project_id, entity_id)
                .await?
                .is_some(),
            EntityKind::Task => store::get_task(&mut *tx, project_id, entity_id)
                .await?
                .is_some(),
            EntityKind::Decision => store::get_decision(&mut *tx, project_id, entity_id)
                .await?
                .is_some(),
        };
        if !exists {
            return Err(EngineError::not_found(entity_kind.as_str(), entity_id));
        }

        if !auth::can_attest(&mut tx, project_id, actor_id, kind).await? {
            return Err(EngineError::ForbiddenAttestationKind {
                actor: actor_id.to_string(),
                kind: kind.to_string(),
            });
        }

        let row = store::AttestationRow {
            id: new_id(),
            project_id: project_id.to_string(),
            entity_kind: entity_kind.as_str().to_string(),
            entity_id: entity_id.to_string(),
            kind: kind.to_string(),
            actor_id: actor_id.to_string(),
            ts: now.clone(),
            payload: payload.to_string(),
        };
        store::insert_attestation(&mut *tx, &row).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "attestation.created",
                project_id,
                entity_kind: "attestation",
                entity_id: &row.id,
                actor_id,
                payload: json!({
                    "kind": kind,
                    "entity_kind": entity_kind.as_str(),
                    "entity_id": entity_id,
                }),
            },
        )
        .await?;

        // A task attestation may flip the task's validation verdict; journal
        // the recomputed state alongside.
        if entity_kind == EntityKind::Task {
            let task = store::get_task(&mut *tx, project_id, entity_id)
                .await?
                .ok_or_else(|| EngineError::not_found("task", entity_id))?;
            let report = tasks::evaluate_task_row(&mut tx, &task).await?;
            event_log::append(
                &mut *tx,
                &now,
                &event_log::NewEvent {
                    event_type: "task.validation.checked",
                    project_id,
                    entity_kind: "task",
                    entity_id,
                    actor_id,
                    payload: serde_json::to_value(&report)
                        .map_err(|e| EngineError::Internal(e.into()))?,
                },
            )
            .await?;
        }

        tx.commit().await?;
        row.into_attestation()
    }

    pub async fn list_attestations(
        &self,
        project_id: &str,
        entity_kind: Option<&str>,
        entity_id: Option<&str>,
        kind: Option<&str>,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> EngineResult<Page<Attestation>> {
        self.get_project(project_id).await?;
        let limit = store::clamp_limit(limit);
        let cursor = decode_opt_cursor(cursor)?;
        let rows = store::list_attestations(
            self.store.reader(),
            project_id,
            entity_kind,
            entity_id,
            kind,
            cursor,
            limit + 1,
        )
        .await?;
        paginate(rows, limit, |r| (r.ts.clone(), r.id.clone()))
            .try_map_items(|r| r.into_attestation())
    }

    // ─── RBAC ─────────────────────────────────────────────────────────────────

    pub async fn grant_role(
        &self,
        actor_id: &str,
        project_id: &str,
        target_actor: &str,
        role: &str,
    ) -> EngineResult<()> {
        let result = self
            .grant_role_inner(actor_id, project_id, target_actor, role)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn grant_role_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        target_actor: &str,
        role: &str,
    ) -> EngineResult<()> {
        if !auth::role_exists(role) {
            return Err(EngineError::bad_field("role", format!("unknown role: {role}")));
        }
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::RBAC_ADMIN)
            .await?;
        auth::grant_role(&mut *tx, project_id, target_actor, role, &now).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "rbac.role.granted",
                project_id,
                entity_kind: "rbac",
                entity_id: target_actor,
                actor_id,
                payload: json!({ "role": role }),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn revoke_role(
        &self,
        actor_id: &str,
        project_id: &str,
        target_actor: &str,
        role: &str,
    ) -> EngineResult<()> {
        let result = self
            .revoke_role_inner(actor_id, project_id, target_actor, role)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn revoke_role_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        target_actor: &str,
        role: &str,
    ) -> EngineResult<()> {
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::RBAC_ADMIN)
            .await?;
        let removed = auth::revoke_role(&mut *tx, project_id, target_actor, role).await?;
        if !removed {
            return Err(EngineError::not_found("role grant", role));
        }
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "rbac.role.revoked",
                project_id,
                entity_kind: "rbac",
                entity_id: target_actor,
                actor_id,
                payload: json!({ "role": role }),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_attestation_authority(
        &self,
        actor_id: &str,
        project_id: &str,
        kind: &str,
        role: &str,
    ) -> EngineResult<()> {
        let result = self
            .set_attestation_authority_inner(actor_id, project_id, kind, role)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn set_attestation_authority_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        kind: &str,
        role: &str,
    ) -> EngineResult<()> {
        if !auth::role_exists(role) {
            return Err(EngineError::bad_field("role", format!("unknown role: {role}")));
        }
        let now = self.clock.now_rfc3339();
        let mut tx = self.begin().await?;
        let (_, config) = self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::RBAC_ADMIN)
            .await?;
        if !config.attestations.catalog.contains_key(kind) {
            return Err(EngineError::bad_field(
                "kind",
                format!("unknown attestation kind: {kind}"),
            ));
        }
        auth::set_authority(&mut *tx, project_id, kind, role).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "rbac.authority.set",
                project_id,
                entity_kind: "rbac",
                entity_id: kind,
                actor_id,
                payload: json!({ "kind": kind, "role": role }),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_authorities(
        &self,
        project_id: &str,
    ) -> EngineResult<Vec<auth::AuthorityRow>> {
        self.get_project(project_id).await?;
        Ok(auth::list_authorities(self.store.reader(), project_id).await?)
    }

    /// Roles and effective permissions for `(project, actor)`.
    pub async fn my_permissions(
        &self,
        project_id: &str,
        actor_id: &str,
    ) -> EngineResult<ActorPermissions> {
        self.get_project(project_id).await?;
        let roles = auth::roles_of(self.store.reader(), project_id, actor_id).await?;
        let permissions = auth::permissions_for_roles(&roles);
        Ok(ActorPermissions {
            actor_id: actor_id.to_string(),
            roles,
            permissions,
        })
    }

    // ─── Events ───────────────────────────────────────────────────────────────

    pub async fn list_events(
        &self,
        project_id: &str,
        event_type: Option<&str>,
        entity_kind: Option<&str>,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> EngineResult<Page<Event>> {
        self.get_project(project_id).await?;
        let limit = store::clamp_limit(limit);
        let before_id = match cursor {
            None | Some("") => None,
            Some(c) => Some(
                c.parse::<i64>()
                    .map_err(|_| EngineError::bad_field("cursor", "malformed cursor"))?,
            ),
        };
        let rows = event_log::list(
            self.store.reader(),
            project_id,
            event_type,
            entity_kind,
            before_id,
            limit + 1,
        )
        .await?;
        let more = rows.len() as i64 > limit;
        let items: Vec<_> = rows.into_iter().take(limit as usize).collect();
        let next_cursor = if more {
            items.last().map(|r| r.id.to_string()).unwrap_or_default()
        } else {
            String::new()
        };
        let mut events = Vec::with_capacity(items.len());
        for row in items {
            events.push(row.into_event()?);
        }
        Ok(Page {
            items: events,
            next_cursor,
        })
    }

    // ─── Lease sweep ──────────────────────────────────────────────────────────

    /// Delete expired lease rows and journal `lease.expired` for each.
    /// Correctness never depends on this; expiry is checked on read.
    pub async fn sweep_expired_leases(&self) -> EngineResult<u64> {
        let now = self.clock.now();
        let now_str = now.to_rfc3339();
        let mut tx = self.begin().await?;
        let swept = lease::sweep_expired(&mut tx, now).await?;
        for row in &swept {
            let project_id: Option<(String,)> =
                sqlx::query_as("SELECT project_id FROM tasks WHERE id = ?")
                    .bind(&row.task_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some((project_id,)) = project_id else {
                continue;
            };
            event_log::append(
                &mut *tx,
                &now_str,
                &event_log::NewEvent {
                    event_type: "lease.expired",
                    project_id: &project_id,
                    entity_kind: "lease",
                    entity_id: &row.task_id,
                    actor_id: "system",
                    payload: json!({ "owner_id": row.owner_id, "expired_at": row.expires_at }),
                },
            )
            .await?;
        }
        let count = swept.len() as u64;
        tx.commit().await?;
        Ok(count)
    }
}

/// `me/permissions` response body.
#[derive(Debug, Clone, Serialize)]
pub struct ActorPermissions {
    pub actor_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

// ─── Pagination helpers ───────────────────────────────────────────────────────

pub(crate) fn decode_opt_cursor(cursor: Option<&str>) -> EngineResult<Option<(String, String)>> {
    match cursor {
        None | Some("") => Ok(None),
        Some(c) => store::decode_cursor(c).map(Some),
    }
}

pub(crate) struct RawPage<R> {
    rows: Vec<R>,
    next_cursor: String,
}

impl<R> RawPage<R> {
    pub(crate) fn map_items<T>(self, f: impl FnMut(R) -> T) -> Page<T> {
        Page {
            items: self.rows.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }

    pub(crate) fn try_map_items<T>(
        self,
        mut f: impl FnMut(R) -> EngineResult<T>,
    ) -> EngineResult<Page<T>> {
        let mut items = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            items.push(f(row)?);
        }
        Ok(Page {
            items,
            next_cursor: self.next_cursor,
        })
    }
}

/// Split a `limit + 1` fetch into one page plus its continuation cursor.
pub(crate) fn paginate<R>(
    mut rows: Vec<R>,
    limit: i64,
    cursor_of: impl Fn(&R) -> (String, String),
) -> RawPage<R> {
    let more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);
    let next_cursor = if more {
        rows.last()
            .map(|r| {
                let (created_at, id) = cursor_of(r);
                store::encode_cursor(&created_at, &id)
            })
            .unwrap_or_default()
    } else {
        String::new()
    };
    RawPage { rows, next_cursor }
}
