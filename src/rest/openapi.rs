// rest/openapi.rs — hand-maintained OpenAPI 3 document for the API.
//
// Kept deliberately static: the surface is small and the document doubles
// as reviewable API reference. Update this file when routes change.

use axum::Json;
use serde_json::{json, Value};

pub async fn spec() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Proofline API",
            "description": "Project-workflow control plane with attestation-gated task completion.",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "components": {
            "parameters": {
                "Limit": {
                    "name": "limit", "in": "query",
                    "schema": { "type": "integer", "minimum": 1, "maximum": 200 }
                },
                "Cursor": {
                    "name": "cursor", "in": "query",
                    "schema": { "type": "string" },
                    "description": "Opaque continuation cursor from a previous page."
                },
                "ActorHeader": {
                    "name": "X-Actor-Id", "in": "header", "required": true,
                    "schema": { "type": "string" },
                    "description": "Actor identity; required on every mutating request."
                }
            },
            "schemas": {
                "Error": {
                    "type": "object",
                    "properties": {
                        "error": {
                            "type": "object",
                            "properties": {
                                "code": {
                                    "type": "string",
                                    "enum": [
                                        "bad_request", "not_found", "forbidden",
                                        "forbidden_attestation_kind", "lease_conflict",
                                        "conflict", "invalid_transition",
                                        "validation_failed", "canceled", "internal"
                                    ]
                                },
                                "message": { "type": "string" },
                                "details": { "type": "object" }
                            }
                        }
                    }
                },
                "Task": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "project_id": { "type": "string" },
                        "iteration_id": { "type": "string" },
                        "parent_id": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": ["technical", "feature", "bug", "docs", "chore"]
                        },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "status": {
                            "type": "string",
                            "enum": ["planned", "in_progress", "review", "done", "rejected", "canceled"]
                        },
                        "assignee_id": { "type": "string" },
                        "work_proof": { "type": "object" },
                        "validation_mode": {
                            "type": "string",
                            "enum": ["none", "all", "any", "threshold"]
                        },
                        "required_attestations": { "type": "array", "items": { "type": "string" } },
                        "required_threshold": { "type": "integer" },
                        "depends_on": { "type": "array", "items": { "type": "string" } },
                        "created_at": { "type": "string", "format": "date-time" },
                        "updated_at": { "type": "string", "format": "date-time" },
                        "completed_at": { "type": "string", "format": "date-time" }
                    }
                },
                "ValidationReport": {
                    "type": "object",
                    "properties": {
                        "mode": { "type": "string" },
                        "required": { "type": "array", "items": { "type": "string" } },
                        "threshold": { "type": "integer" },
                        "present": { "type": "array", "items": { "type": "string" } },
                        "missing": { "type": "array", "items": { "type": "string" } },
                        "satisfied": { "type": "boolean" }
                    }
                },
                "Lease": {
                    "type": "object",
                    "properties": {
                        "task_id": { "type": "string" },
                        "owner_id": { "type": "string" },
                        "acquired_at": { "type": "string", "format": "date-time" },
                        "expires_at": { "type": "string", "format": "date-time" }
                    }
                }
            }
        },
        "paths": {
            "/projects": {
                "get": { "summary": "List projects" },
                "post": { "summary": "Create a project (creator is granted admin)" }
            },
            "/projects/{project_id}": { "get": { "summary": "Get a project" } },
            "/projects/{project_id}/config": { "get": { "summary": "Project config document" } },
            "/projects/{project_id}/tasks": {
                "get": { "summary": "List tasks (filter: status, iteration)" },
                "post": { "summary": "Create a task" }
            },
            "/projects/{project_id}/tasks/tree": { "get": { "summary": "Parent/child task tree" } },
            "/projects/{project_id}/tasks/{id}": {
                "get": { "summary": "Get a task" },
                "patch": { "summary": "Partially update a task" }
            },
            "/projects/{project_id}/tasks/{id}/claim": {
                "post": { "summary": "Claim or renew the exclusive work lease" }
            },
            "/projects/{project_id}/tasks/{id}/release": {
                "post": { "summary": "Release the work lease" }
            },
            "/projects/{project_id}/tasks/{id}/done": {
                "post": { "summary": "Complete a task (force=true bypasses validation if authorized)" }
            },
            "/projects/{project_id}/tasks/{id}/validation": {
                "get": { "summary": "Current validation verdict" }
            },
            "/projects/{project_id}/iterations": {
                "get": { "summary": "List iterations" },
                "post": { "summary": "Create an iteration" }
            },
            "/projects/{project_id}/iterations/{id}/status": {
                "patch": { "summary": "Transition iteration status" }
            },
            "/projects/{project_id}/decisions": {
                "get": { "summary": "List decisions" },
                "post": { "summary": "Record an immutable decision" }
            },
            "/projects/{project_id}/attestations": {
                "get": { "summary": "List attestations" },
                "post": { "summary": "Record an attestation" }
            },
            "/projects/{project_id}/events": {
                "get": { "summary": "List journal events (filter: type, entity_kind)" }
            },
            "/projects/{project_id}/rbac/roles/grant": { "post": { "summary": "Grant a role" } },
            "/projects/{project_id}/rbac/roles/revoke": { "post": { "summary": "Revoke a role" } },
            "/projects/{project_id}/rbac/authorities": {
                "get": { "summary": "List attestation authorities" },
                "post": { "summary": "Map an attestation kind to a role" }
            },
            "/projects/{project_id}/me/permissions": {
                "get": { "summary": "Roles and permissions of the calling actor" }
            },
            "/healthz": { "get": { "summary": "Liveness probe" } }
        }
    }))
}
