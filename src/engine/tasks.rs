//! Task operations: create, update, complete, claim, release, and the
//! read-side views (get, list, tree, validation).

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqliteConnection;

use crate::auth;
use crate::error::{EngineError, EngineResult};
use crate::graph;
use crate::lease::{self, ClaimOutcome};
use crate::model::{new_id, Lease, Task, TaskStatus, TaskType};
use crate::policy::{self, Policy, PolicySource};
use crate::store::{self, event_log, Page, TaskRow};

use super::{decode_opt_cursor, paginate, Engine};

// ─── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    /// Caller-supplied id; server-generated when absent.
    pub id: Option<String>,
    pub title: String,
    pub task_type: TaskType,
    pub description: String,
    pub iteration_id: Option<String>,
    pub parent_id: Option<String>,
    pub assignee_id: Option<String>,
    pub depends_on: Vec<String>,
    /// Named preset overriding the type default.
    pub preset: Option<String>,
    /// Inline policy overriding both preset and default.
    pub validation: Option<Policy>,
    pub work_proof: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<String>,
    pub iteration_id: Option<String>,
    pub parent_id: Option<String>,
    pub add_depends_on: Vec<String>,
    pub remove_depends_on: Vec<String>,
    pub preset: Option<String>,
    pub validation: Option<Policy>,
    pub work_proof: Option<Value>,
}

impl UpdateTaskRequest {
    fn changes_policy(&self) -> bool {
        self.preset.is_some() || self.validation.is_some()
    }
}

/// One node of the parent/child tree.
#[derive(Debug, Clone, Serialize)]
pub struct TaskTreeNode {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTreeNode>,
}

// ─── Shared helpers ───────────────────────────────────────────────────────────

/// Rebuild the effective policy stored on a task row.
pub(crate) fn policy_of_row(row: &TaskRow) -> EngineResult<Policy> {
    let mode = crate::policy::ValidationMode::parse(&row.validation_mode).ok_or_else(|| {
        EngineError::Internal(anyhow::anyhow!(
            "corrupt validation mode: {}",
            row.validation_mode
        ))
    })?;
    let require: Vec<String> = serde_json::from_str(&row.required_attestations)
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("corrupt required_attestations: {e}")))?;
    Ok(Policy {
        mode,
        require,
        threshold: row.required_threshold.map(|n| n as u32),
    })
}

/// Evaluate a task row against its currently attached attestation kinds.
pub(crate) async fn evaluate_task_row(
    conn: &mut SqliteConnection,
    row: &TaskRow,
) -> EngineResult<policy::ValidationReport> {
    let task_policy = policy_of_row(row)?;
    let kinds = store::kinds_for_entity(&mut *conn, "task", &row.id).await?;
    Ok(policy::evaluate(&task_policy, &kinds))
}

fn source_label(source: &PolicySource) -> String {
    match source {
        PolicySource::Default(name) => format!("default:{name}"),
        PolicySource::Preset(name) => format!("preset:{name}"),
        PolicySource::Inline => "inline".to_string(),
        PolicySource::None => "none".to_string(),
    }
}

/// Validate one prospective dependency edge inside the transaction.
async fn check_dep_edge(
    conn: &mut SqliteConnection,
    project_id: &str,
    task_id: &str,
    dep_id: &str,
) -> EngineResult<()> {
    if dep_id == task_id {
        return Err(EngineError::bad_field(
            "depends_on",
            "a task cannot depend on itself",
        ));
    }
    if store::get_task(&mut *conn, project_id, dep_id).await?.is_none() {
        return Err(EngineError::bad_field(
            "depends_on",
            format!("depends_on references a task not in this project: {dep_id}"),
        ));
    }
    if graph::would_create_dep_cycle(&mut *conn, task_id, dep_id).await? {
        return Err(EngineError::bad_field(
            "depends_on",
            format!("dependency on {dep_id} would create a cycle"),
        ));
    }
    Ok(())
}

impl Engine {
    async fn load_task(
        &self,
        conn: &mut SqliteConnection,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<TaskRow> {
        store::get_task(&mut *conn, project_id, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))
    }

    async fn task_from_row(&self, row: TaskRow) -> EngineResult<Task> {
        let deps = store::deps_of(self.store().reader(), &row.id).await?;
        row.into_task(deps)
    }

    // ─── CreateTask ───────────────────────────────────────────────────────────

    pub async fn create_task(
        &self,
        actor_id: &str,
        project_id: &str,
        req: CreateTaskRequest,
    ) -> EngineResult<Task> {
        let result = self.create_task_inner(actor_id, project_id, req).await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn create_task_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        req: CreateTaskRequest,
    ) -> EngineResult<Task> {
        if req.title.trim().is_empty() {
            return Err(EngineError::bad_field("title", "title is required"));
        }
        let now = self.clock().now_rfc3339();
        let mut tx = self.begin().await?;
        let (_, config) = self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::TASK_CREATE)
            .await?;

        let id = req.id.clone().unwrap_or_else(new_id);
        if store::get_task(&mut *tx, project_id, &id).await?.is_some() {
            return Err(EngineError::Conflict {
                message: format!("task already exists: {id}"),
            });
        }

        if let Some(iteration_id) = &req.iteration_id {
            if store::get_iteration(&mut *tx, project_id, iteration_id)
                .await?
                .is_none()
            {
                return Err(EngineError::not_found("iteration", iteration_id.clone()));
            }
        }
        if let Some(parent_id) = &req.parent_id {
            if parent_id == &id {
                return Err(EngineError::bad_field(
                    "parent_id",
                    "a task cannot be its own parent",
                ));
            }
            if store::get_task(&mut *tx, project_id, parent_id)
                .await?
                .is_none()
            {
                return Err(EngineError::not_found("task", parent_id.clone()));
            }
        }

        let mut seen = std::collections::HashSet::new();
        let depends_on: Vec<String> = req
            .depends_on
            .iter()
            .filter(|d| seen.insert((*d).clone()))
            .cloned()
            .collect();
        for dep in &depends_on {
            check_dep_edge(&mut tx, project_id, &id, dep).await?;
        }

        let (effective, source) = policy::resolve(
            &config,
            req.task_type,
            req.preset.as_deref(),
            req.validation.as_ref(),
        )?;

        let row = TaskRow {
            id: id.clone(),
            project_id: project_id.to_string(),
            iteration_id: req.iteration_id.clone(),
            parent_id: req.parent_id.clone(),
            task_type: req.task_type.as_str().to_string(),
            title: req.title.clone(),
            description: req.description.clone(),
            status: TaskStatus::Planned.as_str().to_string(),
            assignee_id: req.assignee_id.clone(),
            work_proof: req
                .work_proof
                .clone()
                .unwrap_or_else(|| json!({}))
                .to_string(),
            validation_mode: effective.mode.as_str().to_string(),
            required_attestations: serde_json::to_string(&effective.require)
                .map_err(|e| EngineError::Internal(e.into()))?,
            required_threshold: effective.threshold.map(i64::from),
            created_at: now.clone(),
            updated_at: now.clone(),
            completed_at: None,
        };
        store::insert_task(&mut *tx, &row).await?;
        for dep in &depends_on {
            store::insert_task_dep(&mut *tx, project_id, &id, dep).await?;
        }

        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "task.created",
                project_id,
                entity_kind: "task",
                entity_id: &id,
                actor_id,
                payload: json!({ "title": req.title, "type": req.task_type.as_str() }),
            },
        )
        .await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "task.policy.applied",
                project_id,
                entity_kind: "task",
                entity_id: &id,
                actor_id,
                payload: json!({
                    "mode": effective.mode.as_str(),
                    "require": effective.require,
                    "threshold": effective.threshold,
                    "source": source_label(&source),
                }),
            },
        )
        .await?;
        if source == PolicySource::Inline {
            event_log::append(
                &mut *tx,
                &now,
                &event_log::NewEvent {
                    event_type: "policy.override",
                    project_id,
                    entity_kind: "task",
                    entity_id: &id,
                    actor_id,
                    payload: json!({ "mode": effective.mode.as_str() }),
                },
            )
            .await?;
        }
        tx.commit().await?;

        row.into_task(depends_on)
    }

    // ─── UpdateTask ───────────────────────────────────────────────────────────

    pub async fn update_task(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
        req: UpdateTaskRequest,
    ) -> EngineResult<Task> {
        let result = self
            .update_task_inner(actor_id, project_id, task_id, req)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn update_task_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
        req: UpdateTaskRequest,
    ) -> EngineResult<Task> {
        let now = self.clock().now_rfc3339();
        let mut tx = self.begin().await?;
        let (_, config) = self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::TASK_UPDATE)
            .await?;
        let mut row = self.load_task(&mut tx, project_id, task_id).await?;
        let mut changed: Vec<&str> = Vec::new();

        if let Some(title) = &req.title {
            if title.trim().is_empty() {
                return Err(EngineError::bad_field("title", "title must not be empty"));
            }
            row.title = title.clone();
            changed.push("title");
        }
        if let Some(description) = &req.description {
            row.description = description.clone();
            changed.push("description");
        }
        if let Some(assignee_id) = &req.assignee_id {
            row.assignee_id = Some(assignee_id.clone());
            changed.push("assignee_id");
        }
        if let Some(work_proof) = &req.work_proof {
            row.work_proof = work_proof.to_string();
            changed.push("work_proof");
        }
        if let Some(iteration_id) = &req.iteration_id {
            if store::get_iteration(&mut *tx, project_id, iteration_id)
                .await?
                .is_none()
            {
                return Err(EngineError::not_found("iteration", iteration_id.clone()));
            }
            row.iteration_id = Some(iteration_id.clone());
            changed.push("iteration_id");
        }
        if let Some(parent_id) = &req.parent_id {
            if parent_id == task_id {
                return Err(EngineError::bad_field(
                    "parent_id",
                    "a task cannot be its own parent",
                ));
            }
            if store::get_task(&mut *tx, project_id, parent_id)
                .await?
                .is_none()
            {
                return Err(EngineError::not_found("task", parent_id.clone()));
            }
            if graph::would_create_parent_cycle(&mut tx, project_id, task_id, parent_id).await? {
                return Err(EngineError::bad_field(
                    "parent_id",
                    format!("parent {parent_id} would create a cycle"),
                ));
            }
            row.parent_id = Some(parent_id.clone());
            changed.push("parent_id");
        }

        for dep in &req.remove_depends_on {
            store::delete_task_dep(&mut *tx, task_id, dep).await?;
        }
        if !req.remove_depends_on.is_empty() {
            changed.push("depends_on");
        }
        for dep in &req.add_depends_on {
            check_dep_edge(&mut tx, project_id, task_id, dep).await?;
            store::insert_task_dep(&mut *tx, project_id, task_id, dep).await?;
        }
        if !req.add_depends_on.is_empty() && !changed.contains(&"depends_on") {
            changed.push("depends_on");
        }

        if req.changes_policy() {
            let task_type = TaskType::parse(&row.task_type).ok_or_else(|| {
                EngineError::Internal(anyhow::anyhow!("corrupt task type: {}", row.task_type))
            })?;
            let (effective, source) = policy::resolve(
                &config,
                task_type,
                req.preset.as_deref(),
                req.validation.as_ref(),
            )?;
            row.validation_mode = effective.mode.as_str().to_string();
            row.required_attestations = serde_json::to_string(&effective.require)
                .map_err(|e| EngineError::Internal(e.into()))?;
            row.required_threshold = effective.threshold.map(i64::from);
            changed.push("validation");

            event_log::append(
                &mut *tx,
                &now,
                &event_log::NewEvent {
                    event_type: "task.policy.applied",
                    project_id,
                    entity_kind: "task",
                    entity_id: task_id,
                    actor_id,
                    payload: json!({
                        "mode": effective.mode.as_str(),
                        "require": effective.require,
                        "threshold": effective.threshold,
                        "source": source_label(&source),
                    }),
                },
            )
            .await?;
            if source == PolicySource::Inline {
                event_log::append(
                    &mut *tx,
                    &now,
                    &event_log::NewEvent {
                        event_type: "policy.override",
                        project_id,
                        entity_kind: "task",
                        entity_id: task_id,
                        actor_id,
                        payload: json!({ "mode": effective.mode.as_str() }),
                    },
                )
                .await?;
            }
        }

        if let Some(to) = req.status {
            let from = row.status()?;
            if !crate::model::task_transition_allowed(from, to) {
                return Err(EngineError::InvalidTransition {
                    entity: "task",
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                });
            }
            if to == TaskStatus::Done {
                // Completion through update carries no force escape; it
                // needs the lease (or lease-independent authority) and a
                // satisfied policy, exactly like the done operation.
                self.check_completion_guards(&mut tx, project_id, actor_id, &row, false)
                    .await?;
                row.completed_at = Some(now.clone());
                self.release_lease_if_any(&mut tx, project_id, actor_id, task_id, "completed", &now)
                    .await?;
            }
            row.status = to.as_str().to_string();
            changed.push("status");
            let event_type = if to == TaskStatus::Done {
                "task.done"
            } else {
                "task.status.changed"
            };
            event_log::append(
                &mut *tx,
                &now,
                &event_log::NewEvent {
                    event_type,
                    project_id,
                    entity_kind: "task",
                    entity_id: task_id,
                    actor_id,
                    payload: json!({ "from": from.as_str(), "to": to.as_str() }),
                },
            )
            .await?;
        }

        if changed.is_empty() {
            return Err(EngineError::bad_request("no fields to update"));
        }

        row.updated_at = now.clone();
        store::update_task(&mut *tx, &row).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "task.updated",
                project_id,
                entity_kind: "task",
                entity_id: task_id,
                actor_id,
                payload: json!({ "fields": changed }),
            },
        )
        .await?;
        let deps = store::deps_of(&mut *tx, task_id).await?;
        tx.commit().await?;

        row.into_task(deps)
    }

    // ─── CompleteTask ─────────────────────────────────────────────────────────

    /// Completion preconditions: the caller holds the active lease or the
    /// `task.force_done` permission, and the validation policy is satisfied
    /// unless an authorized `force` bypasses it.
    async fn check_completion_guards(
        &self,
        conn: &mut SqliteConnection,
        project_id: &str,
        actor_id: &str,
        row: &TaskRow,
        force: bool,
    ) -> EngineResult<policy::ValidationReport> {
        let holds_lease = lease::active_lease(&mut *conn, &row.id, self.clock().now())
            .await?
            .map(|l| l.owner_id == actor_id)
            .unwrap_or(false);
        if !holds_lease
            && !auth::has_permission(&mut *conn, project_id, actor_id, auth::TASK_FORCE_DONE)
                .await?
        {
            return Err(EngineError::Forbidden {
                actor: actor_id.to_string(),
                permission: auth::TASK_FORCE_DONE.to_string(),
            });
        }
        if force
            && !auth::has_permission(&mut *conn, project_id, actor_id, auth::TASK_FORCE_DONE)
                .await?
        {
            return Err(EngineError::Forbidden {
                actor: actor_id.to_string(),
                permission: auth::TASK_FORCE_DONE.to_string(),
            });
        }

        let report = evaluate_task_row(&mut *conn, row).await?;
        if !report.satisfied && !force {
            return Err(EngineError::validation_failed(
                "validation policy not satisfied",
                Some(json!({ "present": report.present, "missing": report.missing })),
            ));
        }
        Ok(report)
    }

    async fn release_lease_if_any(
        &self,
        conn: &mut SqliteConnection,
        project_id: &str,
        actor_id: &str,
        task_id: &str,
        reason: &str,
        now: &str,
    ) -> EngineResult<()> {
        if lease::delete_lease(&mut *conn, task_id).await? {
            event_log::append(
                &mut *conn,
                now,
                &event_log::NewEvent {
                    event_type: "lease.released",
                    project_id,
                    entity_kind: "lease",
                    entity_id: task_id,
                    actor_id,
                    payload: json!({ "reason": reason }),
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn complete_task(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
        force: bool,
        work_proof: Option<Value>,
    ) -> EngineResult<Task> {
        let result = self
            .complete_task_inner(actor_id, project_id, task_id, force, work_proof)
            .await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn complete_task_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
        force: bool,
        work_proof: Option<Value>,
    ) -> EngineResult<Task> {
        let now = self.clock().now_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        let mut row = self.load_task(&mut tx, project_id, task_id).await?;

        let from = row.status()?;
        if matches!(
            from,
            TaskStatus::Done | TaskStatus::Canceled | TaskStatus::Rejected
        ) {
            return Err(EngineError::InvalidTransition {
                entity: "task",
                from: from.as_str().to_string(),
                to: TaskStatus::Done.as_str().to_string(),
            });
        }

        let report = self
            .check_completion_guards(&mut tx, project_id, actor_id, &row, force)
            .await?;
        let forced = force && !report.satisfied;

        row.status = TaskStatus::Done.as_str().to_string();
        row.completed_at = Some(now.clone());
        row.updated_at = now.clone();
        if let Some(work_proof) = &work_proof {
            row.work_proof = work_proof.to_string();
        }
        store::update_task(&mut *tx, &row).await?;

        self.release_lease_if_any(&mut tx, project_id, actor_id, task_id, "completed", &now)
            .await?;

        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "task.done",
                project_id,
                entity_kind: "task",
                entity_id: task_id,
                actor_id,
                payload: json!({ "from": from.as_str(), "forced": forced }),
            },
        )
        .await?;
        if force {
            event_log::append(
                &mut *tx,
                &now,
                &event_log::NewEvent {
                    event_type: "task.force_done",
                    project_id,
                    entity_kind: "task",
                    entity_id: task_id,
                    actor_id,
                    payload: json!({ "satisfied": report.satisfied }),
                },
            )
            .await?;
        }
        let deps = store::deps_of(&mut *tx, task_id).await?;
        tx.commit().await?;

        row.into_task(deps)
    }

    // ─── Claim / Release ──────────────────────────────────────────────────────

    pub async fn claim_task(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<Lease> {
        let result = self.claim_task_inner(actor_id, project_id, task_id).await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn claim_task_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<Lease> {
        let now = self.clock().now();
        let now_str = now.to_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        self.authorize(&mut tx, project_id, actor_id, auth::TASK_CLAIM)
            .await?;
        let row = self.load_task(&mut tx, project_id, task_id).await?;
        let status = row.status()?;
        if matches!(
            status,
            TaskStatus::Done | TaskStatus::Canceled | TaskStatus::Rejected
        ) {
            return Err(EngineError::Conflict {
                message: format!("task is {} and cannot be claimed", status.as_str()),
            });
        }

        let (lease_row, outcome) =
            lease::claim(&mut tx, task_id, actor_id, now, self.settings().lease_ttl).await?;
        let event_type = match outcome {
            ClaimOutcome::Acquired => "lease.acquired",
            ClaimOutcome::Renewed => "lease.renewed",
        };
        event_log::append(
            &mut *tx,
            &now_str,
            &event_log::NewEvent {
                event_type,
                project_id,
                entity_kind: "lease",
                entity_id: task_id,
                actor_id,
                payload: json!({ "owner_id": actor_id, "expires_at": lease_row.expires_at }),
            },
        )
        .await?;
        tx.commit().await?;

        Ok(lease_row.into_lease())
    }

    pub async fn release_task(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<()> {
        let result = self.release_task_inner(actor_id, project_id, task_id).await;
        self.journal_denial(result, project_id, actor_id).await
    }

    async fn release_task_inner(
        &self,
        actor_id: &str,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<()> {
        let now = self.clock().now_rfc3339();
        let mut tx = self.begin().await?;
        self.load_project(&mut tx, project_id).await?;
        self.load_task(&mut tx, project_id, task_id).await?;

        let current = lease::get_lease(&mut *tx, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("lease", task_id))?;
        if current.owner_id != actor_id
            && !auth::has_permission(&mut *tx, project_id, actor_id, auth::LEASE_ADMIN).await?
        {
            return Err(EngineError::Forbidden {
                actor: actor_id.to_string(),
                permission: auth::LEASE_ADMIN.to_string(),
            });
        }

        lease::delete_lease(&mut *tx, task_id).await?;
        event_log::append(
            &mut *tx,
            &now,
            &event_log::NewEvent {
                event_type: "lease.released",
                project_id,
                entity_kind: "lease",
                entity_id: task_id,
                actor_id,
                payload: json!({ "reason": "released", "owner_id": current.owner_id }),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // ─── Reads ────────────────────────────────────────────────────────────────

    pub async fn get_task(&self, project_id: &str, task_id: &str) -> EngineResult<Task> {
        let row = store::get_task(self.store().reader(), project_id, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        self.task_from_row(row).await
    }

    pub async fn list_tasks(
        &self,
        project_id: &str,
        status: Option<&str>,
        iteration_id: Option<&str>,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> EngineResult<Page<Task>> {
        self.get_project(project_id).await?;
        if let Some(status) = status {
            if TaskStatus::parse(status).is_none() {
                return Err(EngineError::bad_field(
                    "status",
                    format!("unknown status: {status}"),
                ));
            }
        }
        let limit = store::clamp_limit(limit);
        let cursor = decode_opt_cursor(cursor)?;
        let rows = store::list_tasks(
            self.store().reader(),
            project_id,
            status,
            iteration_id,
            cursor,
            limit + 1,
        )
        .await?;
        let page = paginate(rows, limit, |r| (r.created_at.clone(), r.id.clone()));
        let mut deps_by_task = self.project_deps_map(project_id).await?;
        page.try_map_items(|row| {
            let deps = deps_by_task.remove(&row.id).unwrap_or_default();
            row.into_task(deps)
        })
    }

    async fn project_deps_map(
        &self,
        project_id: &str,
    ) -> EngineResult<std::collections::HashMap<String, Vec<String>>> {
        let edges = store::all_project_deps(self.store().reader(), project_id).await?;
        let mut map: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        for (task_id, dep_id) in edges {
            map.entry(task_id).or_default().push(dep_id);
        }
        Ok(map)
    }

    /// The parent/child tree of every task in the project, children ordered
    /// oldest first.
    pub async fn task_tree(&self, project_id: &str) -> EngineResult<Vec<TaskTreeNode>> {
        self.get_project(project_id).await?;
        let rows = store::all_project_tasks(self.store().reader(), project_id).await?;
        let mut deps_by_task = self.project_deps_map(project_id).await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let deps = deps_by_task.remove(&row.id).unwrap_or_default();
            tasks.push(row.into_task(deps)?);
        }

        let ids: std::collections::HashSet<String> =
            tasks.iter().map(|t| t.id.clone()).collect();
        let mut children: std::collections::HashMap<String, Vec<Task>> =
            std::collections::HashMap::new();
        let mut roots = Vec::new();
        for task in tasks {
            match &task.parent_id {
                Some(parent) if ids.contains(parent) => {
                    children.entry(parent.clone()).or_default().push(task);
                }
                _ => roots.push(task),
            }
        }

        fn build(
            task: Task,
            children: &mut std::collections::HashMap<String, Vec<Task>>,
        ) -> TaskTreeNode {
            let kids = children.remove(&task.id).unwrap_or_default();
            TaskTreeNode {
                task,
                children: kids.into_iter().map(|t| build(t, children)).collect(),
            }
        }

        Ok(roots.into_iter().map(|t| build(t, &mut children)).collect())
    }

    /// Current validation verdict for a task.
    pub async fn task_validation(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<policy::ValidationReport> {
        let row = store::get_task(self.store().reader(), project_id, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        let task_policy = policy_of_row(&row)?;
        let kinds = store::kinds_for_entity(self.store().reader(), "task", task_id).await?;
        Ok(policy::evaluate(&task_policy, &kinds))
    }
}
