// rest/routes/attestations.rs — append-only attestation records.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::model::EntityKind;
use crate::rest::{req_str, require_actor, ApiError};
use crate::AppContext;

use super::projects::internal;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub entity_kind: Option<String>,
    pub entity_id: Option<String>,
    pub kind: Option<String>,
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
    let entity_kind_str = req_str(&body, "entity_kind")?;
    let entity_kind = EntityKind::parse(&entity_kind_str).ok_or_else(|| {
        ApiError::bad_field("entity_kind", format!("unknown entity kind: {entity_kind_str}"))
    })?;
    let entity_id = req_str(&body, "entity_id")?;
    let kind = req_str(&body, "kind")?;
    let payload = body.get("payload").cloned().unwrap_or_else(|| json!({}));

    let attestation = ctx
        .engine
        .create_attestation(&actor, &project_id, entity_kind, &entity_id, &kind, payload)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(attestation).map_err(internal)?),
    ))
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx
        .engine
        .list_attestations(
            &project_id,
            query.entity_kind.as_deref(),
            query.entity_id.as_deref(),
            query.kind.as_deref(),
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(internal)?))
}
