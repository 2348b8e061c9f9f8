//! Engine error taxonomy.
//!
//! Every domain failure carries a stable string code from the fixed set
//! below. The REST layer maps codes to HTTP statuses mechanically and never
//! invents new ones. Store-level failures are translated here so that
//! callers only ever observe the taxonomy.

use serde_json::{json, Value};

/// A domain error produced by the Engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{message}")]
    BadRequest {
        message: String,
        /// Optional `{"field": "..."}` style detail object.
        details: Option<Value>,
    },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("actor {actor} lacks permission {permission}")]
    Forbidden { actor: String, permission: String },
    #[error("actor {actor} may not attest kind {kind}")]
    ForbiddenAttestationKind { actor: String, kind: String },
    #[error("task {task_id} is leased by {owner_id}")]
    LeaseConflict { task_id: String, owner_id: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("{message}")]
    ValidationFailed {
        message: String,
        details: Option<Value>,
    },
    #[error("operation canceled")]
    Canceled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    /// A `bad_request` whose details name the offending field.
    pub fn bad_field(field: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: Some(json!({ "field": field })),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation_failed(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
            details,
        }
    }

    /// The stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::ForbiddenAttestationKind { .. } => "forbidden_attestation_kind",
            Self::LeaseConflict { .. } => "lease_conflict",
            Self::Conflict { .. } => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::Canceled => "canceled",
            Self::Internal(_) => "internal",
        }
    }

    /// Detail object for the wire envelope, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::BadRequest { details, .. } | Self::ValidationFailed { details, .. } => {
                details.as_ref()
            }
            _ => None,
        }
    }

    /// `lease_conflict` and `conflict` may succeed if the caller retries
    /// after the competing writer finishes.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::LeaseConflict { .. } | Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for EngineError {
    /// Translate store errors into the taxonomy: a unique violation means a
    /// competing writer got there first (`conflict`); a missing foreign key
    /// means the referenced entity does not exist; everything else is
    /// `internal` and the underlying cause stays in the logs.
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => Self::Conflict {
                    message: "resource already exists".to_string(),
                },
                sqlx::error::ErrorKind::ForeignKeyViolation => Self::NotFound {
                    entity: "referenced entity",
                    id: String::new(),
                },
                _ => Self::Internal(err.into()),
            },
            _ => Self::Internal(err.into()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
