// rest/mod.rs — HTTP/JSON API server.
//
// Axum router under a configurable base path (default /v0). Handlers decode
// mutation bodies as raw JSON values so that `null` and absent fields are
// distinguishable, call the Engine, and map its error taxonomy to HTTP
// statuses mechanically.

pub mod openapi;
pub mod routes;

use anyhow::Result;
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::EngineError;
use crate::AppContext;

pub async fn start_server(ctx: Arc<AppContext>) -> Result<()> {
    let addr: SocketAddr = format!("127.0.0.1:{}", ctx.server.port).parse()?;
    let router = build_router(ctx.clone());
    info!(
        "proofline API listening on http://{}{}",
        addr, ctx.server.base_path
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let api = Router::new()
        .route(
            "/projects",
            get(routes::projects::list).post(routes::projects::create),
        )
        .route("/projects/{project_id}", get(routes::projects::get))
        .route("/projects/{project_id}/config", get(routes::projects::config))
        .route(
            "/projects/{project_id}/tasks",
            get(routes::tasks::list).post(routes::tasks::create),
        )
        .route("/projects/{project_id}/tasks/tree", get(routes::tasks::tree))
        .route(
            "/projects/{project_id}/tasks/{id}",
            get(routes::tasks::get_one).patch(routes::tasks::update),
        )
        .route(
            "/projects/{project_id}/tasks/{id}/claim",
            post(routes::tasks::claim),
        )
        .route(
            "/projects/{project_id}/tasks/{id}/release",
            post(routes::tasks::release),
        )
        .route(
            "/projects/{project_id}/tasks/{id}/done",
            post(routes::tasks::done),
        )
        .route(
            "/projects/{project_id}/tasks/{id}/validation",
            get(routes::tasks::validation),
        )
        .route(
            "/projects/{project_id}/iterations",
            get(routes::iterations::list).post(routes::iterations::create),
        )
        .route(
            "/projects/{project_id}/iterations/{id}/status",
            patch(routes::iterations::set_status),
        )
        .route(
            "/projects/{project_id}/decisions",
            get(routes::decisions::list).post(routes::decisions::create),
        )
        .route(
            "/projects/{project_id}/attestations",
            get(routes::attestations::list).post(routes::attestations::create),
        )
        .route("/projects/{project_id}/events", get(routes::events::list))
        .route(
            "/projects/{project_id}/rbac/roles/grant",
            post(routes::rbac::grant),
        )
        .route(
            "/projects/{project_id}/rbac/roles/revoke",
            post(routes::rbac::revoke),
        )
        .route(
            "/projects/{project_id}/rbac/authorities",
            get(routes::rbac::list_authorities).post(routes::rbac::set_authority),
        )
        .route(
            "/projects/{project_id}/me/permissions",
            get(routes::rbac::my_permissions),
        )
        .route("/openapi.json", get(openapi::spec))
        .route("/healthz", get(routes::health::healthz));

    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .nest(&ctx.server.base_path, api)
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn not_found(_req: Request) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        "no such route".to_string(),
        None,
    )
}

// ─── Error envelope ───────────────────────────────────────────────────────────

/// Wire-level error: `{"error":{"code":..,"message":..,"details":..}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: String,
        details: Option<Value>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            details,
        }
    }

    pub fn bad_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            message.into(),
            Some(json!({ "field": field })),
        )
    }

    fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "X-Actor-Id header is required".to_string(),
            None,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({ "code": self.code, "message": self.message });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (self.status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    /// Mechanical kind → status mapping; internal causes are logged, never
    /// surfaced in the body.
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Forbidden { .. } | EngineError::ForbiddenAttestationKind { .. } => {
                StatusCode::FORBIDDEN
            }
            EngineError::LeaseConflict { .. } | EngineError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::InvalidTransition { .. } | EngineError::ValidationFailed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::Canceled => StatusCode::BAD_REQUEST,
            EngineError::Internal(cause) => {
                tracing::error!(err = %cause, "internal error");
                return Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                    None,
                );
            }
        };
        let details = err.details().cloned();
        Self::new(status, err.code(), err.to_string(), details)
    }
}

// ─── Request decoding helpers ─────────────────────────────────────────────────

/// Actor identity for mutating requests; absent header → 401.
pub fn require_actor(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(ApiError::unauthorized)
}

/// Required string field; missing/null/non-string → `bad_request` naming the
/// field.
pub fn req_str(body: &Value, field: &'static str) -> Result<String, ApiError> {
    match body.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(ApiError::bad_field(field, format!("{field} is required"))),
    }
}

/// Optional string field; explicit null or a non-string value is rejected.
pub fn opt_str(body: &Value, field: &'static str) -> Result<Option<String>, ApiError> {
    match body.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::bad_field(field, format!("{field} must be a string"))),
    }
}

/// Optional array-of-strings field. JSON `null` is rejected with the field
/// named in details — an absent array and a null array are different
/// mistakes and only the former is allowed.
pub fn opt_string_array(
    body: &Value,
    field: &'static str,
) -> Result<Option<Vec<String>>, ApiError> {
    match body.get(field) {
        None => Ok(None),
        Some(Value::Null) => Err(ApiError::bad_field(field, format!("{field} must not be null"))),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => {
                        return Err(ApiError::bad_field(
                            field,
                            format!("{field} must be an array of strings"),
                        ))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(ApiError::bad_field(
            field,
            format!("{field} must be an array of strings"),
        )),
    }
}

/// Optional object field (opaque payloads like `work_proof`).
pub fn opt_object(body: &Value, field: &'static str) -> Result<Option<Value>, ApiError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => Ok(Some(v.clone())),
        Some(_) => Err(ApiError::bad_field(field, format!("{field} must be an object"))),
    }
}

/// Optional inline validation policy.
pub fn opt_policy(
    body: &Value,
    field: &'static str,
) -> Result<Option<crate::policy::Policy>, ApiError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| ApiError::bad_field(field, format!("invalid {field}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_array_is_rejected_with_field_detail() {
        let body = json!({ "depends_on": null });
        let err = opt_string_array(&body, "depends_on").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.details.unwrap()["field"], "depends_on");
    }

    #[test]
    fn absent_array_is_fine() {
        let body = json!({});
        assert_eq!(opt_string_array(&body, "depends_on").unwrap(), None);
    }

    #[test]
    fn array_of_non_strings_rejected() {
        let body = json!({ "rationale": [1, 2] });
        assert!(opt_string_array(&body, "rationale").is_err());
    }

    #[test]
    fn missing_required_field() {
        let err = req_str(&json!({}), "title").unwrap_err();
        assert_eq!(err.code, "bad_request");
        assert_eq!(err.details.unwrap()["field"], "title");
    }

    #[test]
    fn engine_error_mapping() {
        let api: ApiError = EngineError::LeaseConflict {
            task_id: "t".into(),
            owner_id: "o".into(),
        }
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, "lease_conflict");

        let api: ApiError = EngineError::InvalidTransition {
            entity: "task",
            from: "done".into(),
            to: "planned".into(),
        }
        .into();
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
