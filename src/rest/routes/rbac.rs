// rest/routes/rbac.rs — role grants, attestation authorities, permission
// introspection.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::{req_str, require_actor, ApiError};
use crate::AppContext;

use super::projects::internal;

pub async fn grant(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let actor = require_actor(&headers)?;
    let target = req_str(&body, "actor_id")?;
    let role = req_str(&body, "role")?;
    ctx.engine
        .grant_role(&actor, &project_id, &target, &role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let actor = require_actor(&headers)?;
    let target = req_str(&body, "actor_id")?;
    let role = req_str(&body, "role")?;
    ctx.engine
        .revoke_role(&actor, &project_id, &target, &role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_authority(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let actor = require_actor(&headers)?;
    let kind = req_str(&body, "kind")?;
    let role = req_str(&body, "role")?;
    ctx.engine
        .set_attestation_authority(&actor, &project_id, &kind, &role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_authorities(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let rows = ctx.engine.list_authorities(&project_id).await?;
    let items: Vec<Value> = rows
        .iter()
        .map(|r| json!({ "kind": r.kind, "role": r.role_id }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn my_permissions(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let perms = ctx.engine.my_permissions(&project_id, &actor).await?;
    Ok(Json(serde_json::to_value(perms).map_err(internal)?))
}
