//! Append-only event journal.
//!
//! Every mutating Engine operation appends at least one row here inside the
//! same transaction as the state change; ids come from AUTOINCREMENT, so
//! they are strictly increasing in commit order and rows are never touched
//! again.

use serde_json::Value;
use sqlx::{Executor, Sqlite};

use crate::error::{EngineError, EngineResult};
use crate::model::Event;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub ts: String,
    pub event_type: String,
    pub project_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub actor_id: String,
    pub payload: String,
}

impl EventRow {
    pub fn into_event(self) -> EngineResult<Event> {
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("corrupt event payload: {e}")))?;
        Ok(Event {
            id: self.id,
            ts: self.ts,
            event_type: self.event_type,
            project_id: self.project_id,
            entity_kind: self.entity_kind,
            entity_id: self.entity_id,
            actor_id: self.actor_id,
            payload,
        })
    }
}

/// An event about to be appended. `ts` is supplied by the Engine's clock so
/// every event in one transaction shares the mutation timestamp.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub event_type: &'a str,
    pub project_id: &'a str,
    pub entity_kind: &'a str,
    pub entity_id: &'a str,
    pub actor_id: &'a str,
    pub payload: Value,
}

/// Append one event; returns its journal id.
pub async fn append(
    ex: impl Executor<'_, Database = Sqlite>,
    ts: &str,
    event: &NewEvent<'_>,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO events (ts, event_type, project_id, entity_kind, entity_id, actor_id, payload)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ts)
    .bind(event.event_type)
    .bind(event.project_id)
    .bind(event.entity_kind)
    .bind(event.entity_id)
    .bind(event.actor_id)
    .bind(event.payload.to_string())
    .execute(ex)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest-first listing with optional `type` / `entity_kind` filters. The
/// cursor is the journal id of the last row of the previous page.
pub async fn list(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    event_type: Option<&str>,
    entity_kind: Option<&str>,
    before_id: Option<i64>,
    limit: i64,
) -> sqlx::Result<Vec<EventRow>> {
    let mut qb = sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM events WHERE project_id = ");
    qb.push_bind(project_id);
    if let Some(event_type) = event_type {
        qb.push(" AND event_type = ").push_bind(event_type);
    }
    if let Some(entity_kind) = entity_kind {
        qb.push(" AND entity_kind = ").push_bind(entity_kind);
    }
    if let Some(before_id) = before_id {
        qb.push(" AND id < ").push_bind(before_id);
    }
    qb.push(" ORDER BY id DESC LIMIT ").push_bind(limit);
    qb.build_query_as().fetch_all(ex).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;
    use serde_json::json;

    async fn seed_project(storage: &Storage) {
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
    }

    #[tokio::test]
    async fn ids_increase_in_append_order() {
        let storage = Storage::open_in_memory().await.unwrap();
        seed_project(&storage).await;

        let mut tx = storage.begin_write().await.unwrap();
        let mut last = 0;
        for i in 0..3 {
            let id = append(
                &mut *tx,
                "2026-01-01T00:00:00Z",
                &NewEvent {
                    event_type: "task.created",
                    project_id: "p1",
                    entity_kind: "task",
                    entity_id: "t1",
                    actor_id: "tester",
                    payload: json!({ "n": i }),
                },
            )
            .await
            .unwrap();
            assert!(id > last);
            last = id;
        }
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let storage = Storage::open_in_memory().await.unwrap();
        seed_project(&storage).await;

        let mut tx = storage.begin_write().await.unwrap();
        for event_type in ["task.created", "auth.denied", "task.created"] {
            append(
                &mut *tx,
                "2026-01-01T00:00:00Z",
                &NewEvent {
                    event_type,
                    project_id: "p1",
                    entity_kind: "task",
                    entity_id: "t1",
                    actor_id: "tester",
                    payload: json!({}),
                },
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let all = list(storage.reader(), "p1", None, None, None, 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        // Newest first.
        assert!(all[0].id > all[2].id);

        let denied = list(storage.reader(), "p1", Some("auth.denied"), None, None, 10)
            .await
            .unwrap();
        assert_eq!(denied.len(), 1);

        let page = list(storage.reader(), "p1", None, None, Some(all[0].id), 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
