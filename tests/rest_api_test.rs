//! HTTP surface tests: routing, request decoding, the error envelope, and
//! the literal wire-level scenarios. Requests go straight through the
//! router via `tower::ServiceExt::oneshot` — no socket needed.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use proofline::clock::SystemClock;
use proofline::config::{EngineSettings, ProjectConfig, ServerSettings};
use proofline::engine::Engine;
use proofline::rest::build_router;
use proofline::store::Storage;
use proofline::AppContext;

const PROJECT: &str = "proofline";

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn app() -> axum::Router {
    let storage = Storage::open_in_memory().await.unwrap();
    let engine = Engine::new(storage, Arc::new(SystemClock), EngineSettings::default());
    engine
        .init_project(
            "tester",
            ProjectConfig::default_document(PROJECT, "software"),
            "",
        )
        .await
        .unwrap();
    build_router(Arc::new(AppContext {
        engine,
        server: ServerSettings::default(),
    }))
}

fn request(method: &str, uri: &str, actor: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header("x-actor-id", actor);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

async fn create_task(app: &axum::Router, body: Value) -> Value {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks"),
            Some("tester"),
            Some(body),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_to_done_over_http() {
    let app = app().await;
    let task = create_task(&app, json!({ "title": "Ship feature", "type": "feature" })).await;
    let task_id = task["id"].as_str().unwrap();
    assert_eq!(task["status"], "planned");
    assert_eq!(task["depends_on"], json!([]));

    for kind in ["ci.passed", "review.approved", "acceptance.passed"] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/v0/projects/{PROJECT}/attestations"),
                Some("tester"),
                Some(json!({
                    "entity_kind": "task",
                    "entity_id": task_id,
                    "kind": kind,
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/claim"),
            Some("tester"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let lease = body_json(response).await;
    assert_eq!(lease["owner_id"], "tester");

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/done?force=true"),
            Some("tester"),
            Some(json!({ "work_proof": { "note": "ok" } })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let done = body_json(response).await;
    assert_eq!(done["status"], "done");
    assert!(done["completed_at"].is_string());
}

#[tokio::test]
async fn lease_conflict_is_409() {
    let app = app().await;
    let task = create_task(&app, json!({ "title": "Contended", "type": "chore" })).await;
    let task_id = task["id"].as_str().unwrap();

    for (actor, role) in [("alice", "contributor"), ("bob", "contributor")] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/v0/projects/{PROJECT}/rbac/roles/grant"),
                Some("tester"),
                Some(json!({ "actor_id": actor, "role": role })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let first = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/claim"),
            Some("alice"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/claim"),
            Some("bob"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let envelope = body_json(second).await;
    assert_eq!(envelope["error"]["code"], "lease_conflict");
}

#[tokio::test]
async fn validation_block_and_report() {
    let app = app().await;
    let task = create_task(
        &app,
        json!({
            "title": "Guarded",
            "type": "technical",
            "validation": { "mode": "all", "require": ["ci.passed", "review.approved"] },
        }),
    )
    .await;
    let task_id = task["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/attestations"),
            Some("tester"),
            Some(json!({ "entity_kind": "task", "entity_id": task_id, "kind": "ci.passed" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/claim"),
            Some("tester"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/done"),
            Some("tester"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let envelope = body_json(response).await;
    assert_eq!(envelope["error"]["code"], "validation_failed");

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v0/projects/{PROJECT}/tasks/{task_id}/validation"),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["present"], json!(["ci.passed"]));
    assert_eq!(report["missing"], json!(["review.approved"]));
    assert_eq!(report["satisfied"], json!(false));
}

#[tokio::test]
async fn iteration_validation_gate() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/iterations"),
            Some("tester"),
            Some(json!({ "goal": "ship" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let iteration = body_json(response).await;
    let iteration_id = iteration["id"].as_str().unwrap();

    for status in ["running", "delivered"] {
        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/v0/projects/{PROJECT}/iterations/{iteration_id}/status"),
                Some("tester"),
                Some(json!({ "status": status })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(request(
            "PATCH",
            &format!("/v0/projects/{PROJECT}/iterations/{iteration_id}/status"),
            Some("tester"),
            Some(json!({ "status": "validated" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let envelope = body_json(response).await;
    assert_eq!(envelope["error"]["code"], "validation_failed");
}

#[tokio::test]
async fn rbac_denial_emits_visible_event() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks"),
            Some("intruder"),
            Some(json!({ "title": "x", "type": "chore" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(response).await;
    assert_eq!(envelope["error"]["code"], "forbidden");

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v0/projects/{PROJECT}/events?type=auth.denied"),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["actor_id"], "intruder");
}

#[tokio::test]
async fn attestation_authority_denial() {
    let app = app().await;
    let task = create_task(&app, json!({ "title": "t", "type": "chore" })).await;
    let task_id = task["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/rbac/roles/grant"),
            Some("tester"),
            Some(json!({ "actor_id": "rev", "role": "reviewer" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/attestations"),
            Some("rev"),
            Some(json!({ "entity_kind": "task", "entity_id": task_id, "kind": "security.ok" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(response).await;
    assert_eq!(envelope["error"]["code"], "forbidden_attestation_kind");
}

// ─── Request decoding ─────────────────────────────────────────────────────────

#[tokio::test]
async fn null_depends_on_is_rejected_with_field() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks"),
            Some("tester"),
            Some(json!({ "title": "x", "type": "technical", "depends_on": null })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope = body_json(response).await;
    assert_eq!(envelope["error"]["code"], "bad_request");
    assert_eq!(envelope["error"]["details"]["field"], "depends_on");
}

#[tokio::test]
async fn missing_required_fields_are_400() {
    let app = app().await;
    for body in [json!({ "type": "chore" }), json!({ "title": "x" })] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/v0/projects/{PROJECT}/tasks"),
                Some("tester"),
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn mutations_require_actor_header() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/v0/projects/{PROJECT}/tasks"),
            None,
            Some(json!({ "title": "x", "type": "chore" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_listing_shape() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v0/projects/{PROJECT}/tasks"),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["items"], json!([]));
    assert_eq!(page["next_cursor"], json!(""));
}

#[tokio::test]
async fn unknown_project_is_404() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request("GET", "/v0/projects/nope/tasks", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let envelope = body_json(response).await;
    assert_eq!(envelope["error"]["code"], "not_found");
}

// ─── Misc surface ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn config_document_shape() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v0/projects/{PROJECT}/config"),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let config = body_json(response).await;
    assert_eq!(config["project"]["id"], PROJECT);
    assert!(config["attestations"]["catalog"]["ci.passed"].is_object());
    assert_eq!(config["policies"]["presets"]["standard"]["mode"], "all");
    assert_eq!(
        config["policies"]["defaults"]["iteration"]["validation"]["require"],
        "iteration.approved"
    );
}

#[tokio::test]
async fn me_permissions_lists_roles() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v0/projects/{PROJECT}/me/permissions"),
            Some("tester"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let perms = body_json(response).await;
    assert_eq!(perms["roles"], json!(["admin"]));
    assert!(perms["permissions"]
        .as_array()
        .unwrap()
        .contains(&json!("task.force_done")));
}

#[tokio::test]
async fn healthz_and_openapi() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request("GET", "/healthz", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request("GET", "/v0/openapi.json", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let spec = body_json(response).await;
    assert_eq!(spec["openapi"], "3.0.3");
    assert!(spec["paths"]["/projects/{project_id}/tasks"].is_object());
}

#[tokio::test]
async fn event_pagination_walk() {
    let app = app().await;
    for i in 0..5 {
        create_task(&app, json!({ "title": format!("t{i}"), "type": "chore" })).await;
    }

    let mut total = 0;
    let mut seen_ids = std::collections::HashSet::new();
    let mut cursor = String::new();
    loop {
        let uri = if cursor.is_empty() {
            format!("/v0/projects/{PROJECT}/events?limit=3")
        } else {
            format!("/v0/projects/{PROJECT}/events?limit=3&cursor={cursor}")
        };
        let response = app.clone().oneshot(request("GET", &uri, None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        for item in page["items"].as_array().unwrap() {
            total += 1;
            assert!(seen_ids.insert(item["id"].as_i64().unwrap()), "duplicate event in walk");
        }
        match page["next_cursor"].as_str() {
            Some("") | None => break,
            Some(next) => cursor = next.to_string(),
        }
    }
    // init (project.created + one admin grant) + 5 tasks × (task.created +
    // task.policy.applied)
    assert_eq!(total, 12);
}
