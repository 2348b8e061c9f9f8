// rest/routes/decisions.rs — immutable decision records.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::{opt_str, opt_string_array, req_str, require_actor, ApiError};
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
    let title = req_str(&body, "title")?;
    let decision = req_str(&body, "decision")?;
    let context = body.get("context").cloned().unwrap_or_else(|| json!({}));
    let rationale = opt_string_array(&body, "rationale")?.unwrap_or_default();
    let alternatives = opt_string_array(&body, "alternatives")?.unwrap_or_default();

    let record = ctx
        .engine
        .create_decision(
            &actor,
            &project_id,
            id,
            &title,
            &decision,
            context,
            rationale,
            alternatives,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(record).map_err(internal)?),
    ))
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx
        .engine
        .list_decisions(&project_id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(internal)?))
}
