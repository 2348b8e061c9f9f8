// rest/routes/projects.rs — project creation, listing, config.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::ProjectConfig;
use crate::rest::{opt_str, req_str, require_actor, ApiError};
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let actor = require_actor(&headers)?;
    let id = req_str(&body, "id")?;
    let kind = opt_str(&body, "kind")?.unwrap_or_else(|| "software".to_string());
    let description = opt_str(&body, "description")?.unwrap_or_default();

    let config = ProjectConfig::default_document(&id, &kind);
    let project = ctx.engine.init_project(&actor, config, &description).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(project).map_err(internal)?)))
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx
        .engine
        .list_projects(query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(internal)?))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project = ctx.engine.get_project(&project_id).await?;
    Ok(Json(serde_json::to_value(project).map_err(internal)?))
}

pub async fn config(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(ctx.engine.get_config(&project_id).await?))
}

pub(crate) fn internal(err: serde_json::Error) -> ApiError {
    crate::error::EngineError::Internal(err.into()).into()
}
