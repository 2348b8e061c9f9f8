//! Workspace layout and the project configuration document.
//!
//! A workspace is any directory holding a `.proofline/` subdirectory with
//! the SQLite database and an optional `proofline.yml`. The YAML document
//! seeds the in-store project config at `init`; afterwards the store copy is
//! authoritative and `GET /projects/{id}/config` renders it back as JSON in
//! the same shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::policy::{Policy, ValidationMode};

pub const WORKSPACE_DIR: &str = ".proofline";
pub const DB_FILE: &str = "proofline.db";
pub const CONFIG_FILE: &str = "proofline.yml";

// ─── Workspace paths ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir().join(DB_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir().join(CONFIG_FILE)
    }

    /// Parse `.proofline/proofline.yml` if present. A malformed file is an
    /// error, not a silent fallback — `init` must not half-seed a project.
    pub fn load_config(&self) -> anyhow::Result<Option<ProjectConfig>> {
        let path = self.config_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: ProjectConfig = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        Ok(Some(config))
    }
}

// ─── Project configuration document ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    #[serde(default)]
    pub attestations: AttestationsSection,
    #[serde(default)]
    pub policies: PoliciesSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "software".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationsSection {
    /// Known attestation kinds. Policies and attestations may only reference
    /// kinds listed here.
    #[serde(default)]
    pub catalog: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesSection {
    #[serde(default)]
    pub presets: BTreeMap<String, Policy>,
    #[serde(default)]
    pub defaults: PolicyDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// task type → preset name. A type absent here defaults to mode `none`.
    #[serde(default)]
    pub task: BTreeMap<String, String>,
    #[serde(default)]
    pub iteration: IterationDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationDefaults {
    #[serde(default)]
    pub validation: IterationValidation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationValidation {
    /// Attestation kind required before an iteration may become `validated`.
    /// Empty means no gate.
    #[serde(default)]
    pub require: String,
}

impl ProjectConfig {
    /// The built-in document used when a workspace has no `proofline.yml`.
    pub fn default_document(id: &str, kind: &str) -> Self {
        let catalog: BTreeMap<String, CatalogEntry> = [
            ("ci.passed", "CI pipeline green"),
            ("review.approved", "Code review approval"),
            ("acceptance.passed", "Acceptance criteria verified"),
            ("iteration.approved", "Iteration sign-off"),
            ("security.ok", "Security review"),
        ]
        .into_iter()
        .map(|(k, d)| {
            (
                k.to_string(),
                CatalogEntry {
                    description: d.to_string(),
                },
            )
        })
        .collect();

        let mut presets = BTreeMap::new();
        presets.insert(
            "standard".to_string(),
            Policy {
                mode: ValidationMode::All,
                require: vec!["ci.passed".to_string(), "review.approved".to_string()],
                threshold: None,
            },
        );
        presets.insert(
            "lenient".to_string(),
            Policy {
                mode: ValidationMode::Any,
                require: vec!["ci.passed".to_string(), "review.approved".to_string()],
                threshold: None,
            },
        );
        presets.insert(
            "gated".to_string(),
            Policy {
                mode: ValidationMode::Threshold,
                require: vec![
                    "ci.passed".to_string(),
                    "review.approved".to_string(),
                    "acceptance.passed".to_string(),
                ],
                threshold: Some(2),
            },
        );

        let task_defaults: BTreeMap<String, String> = [
            ("feature", "standard"),
            ("technical", "standard"),
            ("bug", "standard"),
            ("docs", "lenient"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            project: ProjectSection {
                id: id.to_string(),
                kind: kind.to_string(),
            },
            attestations: AttestationsSection { catalog },
            policies: PoliciesSection {
                presets,
                defaults: PolicyDefaults {
                    task: task_defaults,
                    iteration: IterationDefaults {
                        validation: IterationValidation {
                            require: "iteration.approved".to_string(),
                        },
                    },
                },
            },
        }
    }

    /// The iteration gate kind, if one is configured.
    pub fn iteration_required_kind(&self) -> Option<&str> {
        let kind = self.policies.defaults.iteration.validation.require.as_str();
        if kind.is_empty() {
            None
        } else {
            Some(kind)
        }
    }

    /// Cross-reference check used by `config validate` and `init`: every
    /// preset reference must resolve and every referenced kind must be in
    /// the catalog. Returns human-readable problems; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (name, preset) in &self.policies.presets {
            for kind in &preset.require {
                if !self.attestations.catalog.contains_key(kind) {
                    problems.push(format!("preset {name}: unknown attestation kind {kind}"));
                }
            }
            match preset.mode {
                ValidationMode::Threshold => match preset.threshold {
                    Some(n) if n >= 1 && (n as usize) <= preset.require.len() => {}
                    Some(n) => problems.push(format!(
                        "preset {name}: threshold {n} out of range 1..={}",
                        preset.require.len()
                    )),
                    None => {
                        problems.push(format!("preset {name}: threshold mode without threshold"))
                    }
                },
                ValidationMode::None => {
                    if !preset.require.is_empty() || preset.threshold.is_some() {
                        problems.push(format!("preset {name}: mode none must be empty"));
                    }
                }
                _ => {
                    if preset.threshold.is_some() {
                        problems.push(format!("preset {name}: threshold without threshold mode"));
                    }
                }
            }
        }

        for (task_type, preset) in &self.policies.defaults.task {
            if crate::model::TaskType::parse(task_type).is_none() {
                problems.push(format!("defaults.task: unknown task type {task_type}"));
            }
            if !self.policies.presets.contains_key(preset) {
                problems.push(format!("defaults.task.{task_type}: unknown preset {preset}"));
            }
        }

        if let Some(kind) = self.iteration_required_kind() {
            if !self.attestations.catalog.contains_key(kind) {
                problems.push(format!(
                    "defaults.iteration.validation.require: unknown attestation kind {kind}"
                ));
            }
        }

        problems
    }
}

// ─── Engine tunables ──────────────────────────────────────────────────────────

/// Knobs fixed at Engine construction. Lease TTL is process-global, not
/// per-project.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub lease_ttl: chrono::Duration,
    /// Interval for the optional expired-lease sweep; `None` disables it.
    /// Correctness never depends on the sweep — expiry is checked on read.
    pub lease_sweep_interval: Option<std::time::Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lease_ttl: chrono::Duration::minutes(15),
            lease_sweep_interval: Some(std::time::Duration::from_secs(60)),
        }
    }
}

// ─── Server settings ──────────────────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 7350;
pub const DEFAULT_BASE_PATH: &str = "/v0";

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub base_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_is_valid() {
        let config = ProjectConfig::default_document("proofline", "software");
        assert!(config.validate().is_empty());
        assert_eq!(config.iteration_required_kind(), Some("iteration.approved"));
    }

    #[test]
    fn yaml_round_trip_preserves_shape() {
        let config = ProjectConfig::default_document("proofline", "software");
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ProjectConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.id, "proofline");
        assert_eq!(parsed.policies.presets["gated"].threshold, Some(2));
    }

    #[test]
    fn validate_flags_dangling_references() {
        let mut config = ProjectConfig::default_document("p", "software");
        config
            .policies
            .defaults
            .task
            .insert("feature".to_string(), "missing".to_string());
        config.policies.defaults.iteration.validation.require = "nope".to_string();
        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("unknown preset missing")));
        assert!(problems.iter().any(|p| p.contains("nope")));
    }

    #[test]
    fn minimal_yaml_parses_with_defaults() {
        let yaml = "project:\n  id: demo\n";
        let config: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.project.kind, "software");
        assert!(config.attestations.catalog.is_empty());
        assert!(config.iteration_required_kind().is_none());
    }

    #[test]
    fn workspace_paths() {
        let ws = Workspace::at("/tmp/demo");
        assert!(ws.db_path().ends_with(".proofline/proofline.db"));
        assert!(ws.config_path().ends_with(".proofline/proofline.yml"));
    }
}
