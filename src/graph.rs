//! Dependency-graph guards.
//!
//! `depends_on` must stay a DAG and `parent_id` a tree. Both checks run
//! on demand inside the caller's write transaction by walking current edge
//! rows — there is no cached graph to fall out of sync.

use std::collections::{HashSet, VecDeque};

use sqlx::SqliteConnection;

/// Would adding the edge `task_id → new_dep` (task depends on dep) close a
/// cycle? True when `new_dep` transitively depends on `task_id` already.
/// The caller rejects `task_id == new_dep` before calling.
pub async fn would_create_dep_cycle(
    conn: &mut SqliteConnection,
    task_id: &str,
    new_dep: &str,
) -> sqlx::Result<bool> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(new_dep.to_string());

    while let Some(current) = queue.pop_front() {
        if current == task_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let next = crate::store::deps_of(&mut *conn, &current).await?;
        queue.extend(next);
    }
    Ok(false)
}

/// Would re-parenting `task_id` under `new_parent` make the task its own
/// ancestor? Walks the parent chain upward from `new_parent`.
pub async fn would_create_parent_cycle(
    conn: &mut SqliteConnection,
    project_id: &str,
    task_id: &str,
    new_parent: &str,
) -> sqlx::Result<bool> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = new_parent.to_string();

    loop {
        if current == task_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            // Pre-existing corruption; treat as a cycle rather than loop.
            return Ok(true);
        }
        let parent: Option<(Option<String>,)> =
            sqlx::query_as("SELECT parent_id FROM tasks WHERE id = ? AND project_id = ?")
                .bind(&current)
                .bind(project_id)
                .fetch_optional(&mut *conn)
                .await?;
        match parent {
            Some((Some(next),)) => current = next,
            _ => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, Storage};

    async fn seed(deps: &[(&str, &str)], parents: &[(&str, Option<&str>)]) -> Storage {
        let storage = Storage::open_in_memory().await.unwrap();
        let mut tx = storage.begin_write().await.unwrap();
        store::insert_project(
            &mut *tx,
            &store::ProjectRow {
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
        for (id, parent) in parents {
            store::insert_task(
                &mut *tx,
                &store::TaskRow {
                    id: id.to_string(),
                    project_id: "p1".into(),
                    iteration_id: None,
                    parent_id: parent.map(str::to_string),
                    task_type: "chore".into(),
                    title: id.to_string(),
                    description: String::new(),
                    status: "planned".into(),
                    assignee_id: None,
                    work_proof: "{}".into(),
                    validation_mode: "none".into(),
                    required_attestations: "[]".into(),
                    required_threshold: None,
                    created_at: "2026-01-01T00:00:00Z".into(),
                    updated_at: "2026-01-01T00:00:00Z".into(),
                    completed_at: None,
                },
            )
            .await
            .unwrap();
        }
        for (task, dep) in deps {
            store::insert_task_dep(&mut *tx, "p1", task, dep).await.unwrap();
        }
        tx.commit().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn direct_back_edge_is_a_cycle() {
        // a → b exists; adding b → a closes the loop.
        let storage = seed(&[("a", "b")], &[("a", None), ("b", None)]).await;
        let mut tx = storage.begin_write().await.unwrap();
        assert!(would_create_dep_cycle(&mut tx, "b", "a").await.unwrap());
        assert!(!would_create_dep_cycle(&mut tx, "a", "b").await.unwrap());
    }

    #[tokio::test]
    async fn transitive_cycle_is_detected() {
        // a → b → c; adding c → a would cycle, c → b would too.
        let storage = seed(
            &[("a", "b"), ("b", "c")],
            &[("a", None), ("b", None), ("c", None)],
        )
        .await;
        let mut tx = storage.begin_write().await.unwrap();
        assert!(would_create_dep_cycle(&mut tx, "c", "a").await.unwrap());
        // A second edge a → c is a diamond, not a cycle.
        assert!(!would_create_dep_cycle(&mut tx, "a", "c").await.unwrap());
    }

    #[tokio::test]
    async fn parent_chain_guard() {
        // root ← mid ← leaf; re-parenting root under leaf would cycle.
        let storage = seed(
            &[],
            &[("root", None), ("mid", Some("root")), ("leaf", Some("mid"))],
        )
        .await;
        let mut tx = storage.begin_write().await.unwrap();
        assert!(would_create_parent_cycle(&mut tx, "p1", "root", "leaf")
            .await
            .unwrap());
        assert!(would_create_parent_cycle(&mut tx, "p1", "root", "root")
            .await
            .unwrap());
        assert!(!would_create_parent_cycle(&mut tx, "p1", "leaf", "root")
            .await
            .unwrap());
    }
}
