// rest/routes/iterations.rs — iteration creation and status transitions.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::model::IterationStatus;
use crate::rest::{opt_str, req_str, require_actor, ApiError};
use crate::AppContext;

use super::projects::{internal, PageQuery};

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let actor = require_actor(&headers)?;
    let id = opt_str(&body, "id")?;
    let goal = opt_str(&body, "goal")?.unwrap_or_default();
    let iteration = ctx
        .engine
        .create_iteration(&actor, &project_id, id, &goal)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(iteration).map_err(internal)?),
    ))
}

pub async fn set_status(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let status_str = req_str(&body, "status")?;
    let status = IterationStatus::parse(&status_str).ok_or_else(|| {
        ApiError::bad_field("status", format!("unknown iteration status: {status_str}"))
    })?;
    let iteration = ctx
        .engine
        .set_iteration_status(&actor, &project_id, &id, status)
        .await?;
    Ok(Json(serde_json::to_value(iteration).map_err(internal)?))
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx
        .engine
        .list_iterations(&project_id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(internal)?))
}
