// rest/routes/events.rs — journal listing.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::rest::ApiError;
use crate::AppContext;

use super::projects::internal;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub entity_kind: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = ctx
        .engine
        .list_events(
            &project_id,
            query.event_type.as_deref(),
            query.entity_kind.as_deref(),
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(internal)?))
}
