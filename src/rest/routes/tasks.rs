// rest/routes/tasks.rs — task CRUD, lease claim/release, completion,
// validation, tree.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::{CreateTaskRequest, UpdateTaskRequest};
use crate::model::{TaskStatus, TaskType};
use crate::rest::{
    opt_object, opt_policy, opt_str, opt_string_array, req_str, require_actor, ApiError,
};
use crate::AppContext;

use super::projects::internal;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub iteration: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let actor = require_actor(&headers)?;
    let title = req_str(&body, "title")?;
    let type_str = req_str(&body, "type")?;
    let task_type = TaskType::parse(&type_str)
        .ok_or_else(|| ApiError::bad_field("type", format!("unknown task type: {type_str}")))?;

    let req = CreateTaskRequest {
        id: opt_str(&body, "id")?,
        title,
        task_type,
        description: opt_str(&body, "description")?.unwrap_or_default(),
        iteration_id: opt_str(&body, "iteration_id")?,
        parent_id: opt_str(&body, "parent_id")?,
        assignee_id: opt_str(&body, "assignee_id")?,
        depends_on: opt_string_array(&body, "depends_on")?.unwrap_or_default(),
        preset: opt_str(&body, "preset")?,
        validation: opt_policy(&body, "validation")?,
        work_proof: opt_object(&body, "work_proof")?,
    };
    let task = ctx.engine.create_task(&actor, &project_id, req).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(task).map_err(internal)?)))
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let status = match opt_str(&body, "status")? {
        Some(s) => Some(
            TaskStatus::parse(&s)
                .ok_or_else(|| ApiError::bad_field("status", format!("unknown status: {s}")))?,
        ),
        None => None,
    };
    let req = UpdateTaskRequest {
        title: opt_str(&body, "title")?,
        description: opt_str(&body, "description")?,
        status,
        assignee_id: opt_str(&body, "assignee_id")?,
        iteration_id: opt_str(&body, "iteration_id")?,
        parent_id: opt_str(&body, "parent_id")?,
        add_depends_on: opt_string_array(&body, "add_depends_on")?.unwrap_or_default(),
        remove_depends_on: opt_string_array(&body, "remove_depends_on")?.unwrap_or_default(),
        preset: opt_str(&body, "preset")?,
        validation: opt_policy(&body, "validation")?,
        work_proof: opt_object(&body, "work_proof")?,
    };
    let task = ctx.engine.update_task(&actor, &project_id, &id, req).await?;
    Ok(Json(serde_json::to_value(task).map_err(internal)?))
}

pub async fn get_one(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx.engine.get_task(&project_id, &id).await?;
    Ok(Json(serde_json::to_value(task).map_err(internal)?))
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx
        .engine
        .list_tasks(
            &project_id,
            query.status.as_deref(),
            query.iteration.as_deref(),
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(internal)?))
}

pub async fn tree(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let nodes = ctx.engine.task_tree(&project_id).await?;
    Ok(Json(json!({ "items": nodes })))
}

pub async fn claim(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let lease = ctx.engine.claim_task(&actor, &project_id, &id).await?;
    Ok(Json(serde_json::to_value(lease).map_err(internal)?))
}

pub async fn release(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = require_actor(&headers)?;
    ctx.engine.release_task(&actor, &project_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DoneQuery {
    pub force: Option<String>,
}

pub async fn done(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
    Query(query): Query<DoneQuery>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let body = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    let force = matches!(query.force.as_deref(), Some("true") | Some("1"))
        || body.get("force").and_then(Value::as_bool).unwrap_or(false);
    let work_proof = opt_object(&body, "work_proof")?;

    let task = ctx
        .engine
        .complete_task(&actor, &project_id, &id, force, work_proof)
        .await?;
    Ok(Json(serde_json::to_value(task).map_err(internal)?))
}

pub async fn validation(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let report = ctx.engine.task_validation(&project_id, &id).await?;
    Ok(Json(serde_json::to_value(report).map_err(internal)?))
}
