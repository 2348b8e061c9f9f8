//! Completion policy: resolution and evaluation.
//!
//! A policy is the value object `(mode, require[], threshold?)`. The
//! resolver assembles the effective policy from project config plus an
//! optional override; the evaluator answers whether a task's attached
//! attestation kinds satisfy it. Both are pure and take no store handle.

use serde::{Deserialize, Serialize};

use crate::config::ProjectConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::TaskType;

// ─── Policy value object ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    None,
    All,
    Any,
    Threshold,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::None => "none",
            ValidationMode::All => "all",
            ValidationMode::Any => "any",
            ValidationMode::Threshold => "threshold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ValidationMode::None),
            "all" => Some(ValidationMode::All),
            "any" => Some(ValidationMode::Any),
            "threshold" => Some(ValidationMode::Threshold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub mode: ValidationMode,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
}

impl Policy {
    pub fn none() -> Self {
        Self {
            mode: ValidationMode::None,
            require: Vec::new(),
            threshold: None,
        }
    }
}

/// How the effective policy was chosen; `Inline` additionally produces a
/// `policy.override` event at task creation / update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    Default(String),
    Preset(String),
    Inline,
    None,
}

// ─── Resolver ─────────────────────────────────────────────────────────────────

/// Effective policy for a task: inline override if present, else the named
/// preset override, else the project default preset for the task type, else
/// `none`. The returned policy is normalized and checked against the
/// attestation catalog.
pub fn resolve(
    config: &ProjectConfig,
    task_type: TaskType,
    preset_override: Option<&str>,
    inline: Option<&Policy>,
) -> EngineResult<(Policy, PolicySource)> {
    if let Some(p) = inline {
        let policy = normalize(p.clone(), config)?;
        return Ok((policy, PolicySource::Inline));
    }

    if let Some(name) = preset_override {
        let preset = config
            .policies
            .presets
            .get(name)
            .ok_or_else(|| EngineError::bad_field("preset", format!("unknown preset: {name}")))?;
        let policy = normalize(preset.clone(), config)?;
        return Ok((policy, PolicySource::Preset(name.to_string())));
    }

    if let Some(name) = config.policies.defaults.task.get(task_type.as_str()) {
        let preset = config.policies.presets.get(name).ok_or_else(|| {
            EngineError::bad_field("preset", format!("default names unknown preset: {name}"))
        })?;
        let policy = normalize(preset.clone(), config)?;
        return Ok((policy, PolicySource::Default(name.clone())));
    }

    Ok((Policy::none(), PolicySource::None))
}

/// De-duplicate `require` preserving order and enforce the structural
/// invariants: `none` carries no kinds and no threshold, `threshold`
/// requires `threshold ∈ [1, |require|]`, and every kind must exist in the
/// project's attestation catalog.
pub fn normalize(mut policy: Policy, config: &ProjectConfig) -> EngineResult<Policy> {
    let mut seen = std::collections::HashSet::new();
    policy.require.retain(|k| seen.insert(k.clone()));

    for kind in &policy.require {
        if !config.attestations.catalog.contains_key(kind) {
            return Err(EngineError::bad_field(
                "require",
                format!("unknown attestation kind: {kind}"),
            ));
        }
    }

    match policy.mode {
        ValidationMode::None => {
            if !policy.require.is_empty() {
                return Err(EngineError::bad_field(
                    "require",
                    "mode none takes no required kinds",
                ));
            }
            if policy.threshold.is_some() {
                return Err(EngineError::bad_field(
                    "threshold",
                    "mode none takes no threshold",
                ));
            }
        }
        ValidationMode::All | ValidationMode::Any => {
            if policy.threshold.is_some() {
                return Err(EngineError::bad_field(
                    "threshold",
                    format!("mode {} takes no threshold", policy.mode.as_str()),
                ));
            }
        }
        ValidationMode::Threshold => {
            let n = policy.threshold.ok_or_else(|| {
                EngineError::bad_field("threshold", "mode threshold requires a threshold")
            })?;
            if n == 0 || n as usize > policy.require.len() {
                return Err(EngineError::bad_field(
                    "threshold",
                    format!(
                        "threshold must be in 1..={}, got {n}",
                        policy.require.len()
                    ),
                ));
            }
        }
    }

    Ok(policy)
}

// ─── Evaluator ────────────────────────────────────────────────────────────────

/// The evaluator's answer for one entity: which required kinds are present,
/// which are missing, and whether the policy is satisfied. `present` and
/// `missing` preserve the configured order of `required`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub mode: ValidationMode,
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub satisfied: bool,
}

/// Evaluate `policy` against the multiset of attestation kinds currently
/// attached to the entity.
pub fn evaluate(policy: &Policy, attached_kinds: &[String]) -> ValidationReport {
    let present: Vec<String> = policy
        .require
        .iter()
        .filter(|k| attached_kinds.contains(k))
        .cloned()
        .collect();
    let missing: Vec<String> = policy
        .require
        .iter()
        .filter(|k| !attached_kinds.contains(k))
        .cloned()
        .collect();

    let satisfied = match policy.mode {
        ValidationMode::None => true,
        ValidationMode::All => missing.is_empty(),
        ValidationMode::Any => !present.is_empty(),
        ValidationMode::Threshold => {
            present.len() >= policy.threshold.unwrap_or(u32::MAX) as usize
        }
    };

    ValidationReport {
        mode: policy.mode,
        required: policy.require.clone(),
        threshold: policy.threshold,
        present,
        missing,
        satisfied,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;

    fn config() -> ProjectConfig {
        ProjectConfig::default_document("proofline", "software")
    }

    fn kinds(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolve_prefers_inline_over_everything() {
        let inline = Policy {
            mode: ValidationMode::Any,
            require: kinds(&["ci.passed"]),
            threshold: None,
        };
        let (policy, source) =
            resolve(&config(), TaskType::Feature, Some("gated"), Some(&inline)).unwrap();
        assert_eq!(policy, inline);
        assert_eq!(source, PolicySource::Inline);
    }

    #[test]
    fn resolve_falls_back_to_type_default() {
        let (policy, source) = resolve(&config(), TaskType::Feature, None, None).unwrap();
        assert_eq!(policy.mode, ValidationMode::All);
        assert_eq!(source, PolicySource::Default("standard".into()));
    }

    #[test]
    fn resolve_without_default_is_none() {
        let (policy, source) = resolve(&config(), TaskType::Chore, None, None).unwrap();
        assert_eq!(policy, Policy::none());
        assert_eq!(source, PolicySource::None);
    }

    #[test]
    fn resolve_rejects_unknown_preset() {
        let err = resolve(&config(), TaskType::Feature, Some("nope"), None).unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn normalize_dedupes_preserving_order() {
        let policy = Policy {
            mode: ValidationMode::All,
            require: kinds(&["review.approved", "ci.passed", "review.approved"]),
            threshold: None,
        };
        let normalized = normalize(policy, &config()).unwrap();
        assert_eq!(normalized.require, kinds(&["review.approved", "ci.passed"]));
    }

    #[test]
    fn normalize_rejects_unknown_kind() {
        let policy = Policy {
            mode: ValidationMode::All,
            require: kinds(&["made.up"]),
            threshold: None,
        };
        assert_eq!(normalize(policy, &config()).unwrap_err().code(), "bad_request");
    }

    #[test]
    fn normalize_threshold_bounds() {
        let base = Policy {
            mode: ValidationMode::Threshold,
            require: kinds(&["ci.passed", "review.approved"]),
            threshold: None,
        };
        assert!(normalize(Policy { threshold: Some(1), ..base.clone() }, &config()).is_ok());
        assert!(normalize(Policy { threshold: Some(2), ..base.clone() }, &config()).is_ok());
        assert!(normalize(Policy { threshold: Some(0), ..base.clone() }, &config()).is_err());
        assert!(normalize(Policy { threshold: Some(3), ..base.clone() }, &config()).is_err());
        assert!(normalize(base, &config()).is_err());
    }

    #[test]
    fn evaluate_none_is_always_satisfied() {
        let report = evaluate(&Policy::none(), &kinds(&["ci.passed"]));
        assert!(report.satisfied);
        assert!(report.present.is_empty());
        assert!(report.missing.is_empty());
    }

    #[test]
    fn evaluate_all_reports_missing_in_required_order() {
        let policy = Policy {
            mode: ValidationMode::All,
            require: kinds(&["ci.passed", "review.approved"]),
            threshold: None,
        };
        let report = evaluate(&policy, &kinds(&["ci.passed"]));
        assert!(!report.satisfied);
        assert_eq!(report.present, kinds(&["ci.passed"]));
        assert_eq!(report.missing, kinds(&["review.approved"]));

        let report = evaluate(&policy, &kinds(&["review.approved", "ci.passed"]));
        assert!(report.satisfied);
        // Order follows `required`, not arrival order.
        assert_eq!(report.present, kinds(&["ci.passed", "review.approved"]));
    }

    #[test]
    fn evaluate_any_needs_one() {
        let policy = Policy {
            mode: ValidationMode::Any,
            require: kinds(&["ci.passed", "review.approved"]),
            threshold: None,
        };
        assert!(!evaluate(&policy, &[]).satisfied);
        assert!(evaluate(&policy, &kinds(&["review.approved"])).satisfied);
    }

    #[test]
    fn evaluate_threshold_counts_intersection() {
        let policy = Policy {
            mode: ValidationMode::Threshold,
            require: kinds(&["ci.passed", "review.approved", "acceptance.passed"]),
            threshold: Some(2),
        };
        assert!(!evaluate(&policy, &kinds(&["ci.passed"])).satisfied);
        assert!(evaluate(&policy, &kinds(&["ci.passed", "acceptance.passed"])).satisfied);
        // Duplicates of one kind count once.
        assert!(!evaluate(&policy, &kinds(&["ci.passed", "ci.passed"])).satisfied);
    }
}
