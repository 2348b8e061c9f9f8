//! Domain model: entities, status enums, and the status state machines.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generate a new ULID string for a server-assigned entity id.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// ─── Status enums ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planned,
    InProgress,
    Review,
    Done,
    Rejected,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Planned => "planned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(TaskStatus::Planned),
            "in_progress" => Some(TaskStatus::InProgress),
            "review" => Some(TaskStatus::Review),
            "done" => Some(TaskStatus::Done),
            "rejected" => Some(TaskStatus::Rejected),
            "canceled" => Some(TaskStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Pending,
    Running,
    Delivered,
    Validated,
    Rejected,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationStatus::Pending => "pending",
            IterationStatus::Running => "running",
            IterationStatus::Delivered => "delivered",
            IterationStatus::Validated => "validated",
            IterationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IterationStatus::Pending),
            "running" => Some(IterationStatus::Running),
            "delivered" => Some(IterationStatus::Delivered),
            "validated" => Some(IterationStatus::Validated),
            "rejected" => Some(IterationStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Technical,
    Feature,
    Bug,
    Docs,
    Chore,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Technical => "technical",
            TaskType::Feature => "feature",
            TaskType::Bug => "bug",
            TaskType::Docs => "docs",
            TaskType::Chore => "chore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "technical" => Some(TaskType::Technical),
            "feature" => Some(TaskType::Feature),
            "bug" => Some(TaskType::Bug),
            "docs" => Some(TaskType::Docs),
            "chore" => Some(TaskType::Chore),
            _ => None,
        }
    }
}

/// What an attestation (or event) points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Iteration,
    Task,
    Decision,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Iteration => "iteration",
            EntityKind::Task => "task",
            EntityKind::Decision => "decision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(EntityKind::Project),
            "iteration" => Some(EntityKind::Iteration),
            "task" => Some(EntityKind::Task),
            "decision" => Some(EntityKind::Decision),
            _ => None,
        }
    }
}

// ─── State machines ───────────────────────────────────────────────────────────

/// Allowed task status edges. Everything else is `invalid_transition`.
pub fn task_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Planned, InProgress)
            | (Planned, Canceled)
            | (Planned, Rejected)
            | (InProgress, Review)
            | (InProgress, Done)
            | (InProgress, Rejected)
            | (InProgress, Canceled)
            | (Review, Done)
            | (Review, InProgress)
            | (Review, Rejected)
            | (Rejected, Planned)
    )
}

/// Allowed iteration status edges. Repeating the current status is not an
/// edge; `rejected -> running` allows a retry.
pub fn iteration_transition_allowed(from: IterationStatus, to: IterationStatus) -> bool {
    use IterationStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Running, Delivered)
            | (Delivered, Validated)
            | (Delivered, Rejected)
            | (Rejected, Running)
    )
}

// ─── Entities ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub id: String,
    pub project_id: String,
    pub goal: String,
    pub status: IterationStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    pub work_proof: Value,
    pub validation_mode: crate::policy::ValidationMode,
    /// Ordered, de-duplicated attestation kinds. Always serialized, `[]`
    /// when empty.
    pub required_attestations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_threshold: Option<u32>,
    /// Task ids in the same project this task depends on. Always serialized.
    pub depends_on: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub decision: String,
    pub decider_id: String,
    pub context: Value,
    pub rationale: Vec<String>,
    pub alternatives: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub id: String,
    pub project_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub kind: String,
    pub actor_id: String,
    pub ts: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub task_id: String,
    pub owner_id: String,
    pub acquired_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub actor_id: String,
    pub payload: Value,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_machine_allows_documented_edges() {
        use TaskStatus::*;
        assert!(task_transition_allowed(Planned, InProgress));
        assert!(task_transition_allowed(InProgress, Review));
        assert!(task_transition_allowed(Review, Done));
        assert!(task_transition_allowed(Review, InProgress));
        assert!(task_transition_allowed(Rejected, Planned));
    }

    #[test]
    fn task_machine_rejects_everything_else() {
        use TaskStatus::*;
        assert!(!task_transition_allowed(Done, Planned));
        assert!(!task_transition_allowed(Canceled, Planned));
        assert!(!task_transition_allowed(Planned, Done));
        assert!(!task_transition_allowed(Planned, Review));
        // Self-loops are not edges.
        assert!(!task_transition_allowed(InProgress, InProgress));
    }

    #[test]
    fn iteration_machine_is_strict() {
        use IterationStatus::*;
        assert!(iteration_transition_allowed(Pending, Running));
        assert!(iteration_transition_allowed(Running, Delivered));
        assert!(iteration_transition_allowed(Delivered, Validated));
        assert!(iteration_transition_allowed(Delivered, Rejected));
        assert!(iteration_transition_allowed(Rejected, Running));
        // Repeating the current status is rejected.
        assert!(!iteration_transition_allowed(Running, Running));
        assert!(!iteration_transition_allowed(Pending, Delivered));
        assert!(!iteration_transition_allowed(Validated, Running));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["planned", "in_progress", "review", "done", "rejected", "canceled"] {
            assert_eq!(TaskStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(TaskStatus::parse("archived").is_none());
        for s in ["pending", "running", "delivered", "validated", "rejected"] {
            assert_eq!(IterationStatus::parse(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn empty_arrays_serialize_as_brackets() {
        let task = Task {
            id: "t1".into(),
            project_id: "p1".into(),
            iteration_id: None,
            parent_id: None,
            task_type: TaskType::Chore,
            title: "x".into(),
            description: String::new(),
            status: TaskStatus::Planned,
            assignee_id: None,
            work_proof: serde_json::json!({}),
            validation_mode: crate::policy::ValidationMode::None,
            required_attestations: vec![],
            required_threshold: None,
            depends_on: vec![],
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
            completed_at: None,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["depends_on"], serde_json::json!([]));
        assert_eq!(json["required_attestations"], serde_json::json!([]));
        assert!(json.get("completed_at").is_none());
    }
}
