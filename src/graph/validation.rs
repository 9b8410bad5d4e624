//! Schema validation of the YAML artifacts each phase writes.
//!
//! Artifacts are parsed as YAML, converted to JSON and checked against the
//! schemas embedded from `schemas/`. The first artifact that fails decides
//! the route: repair while retries remain, otherwise fail the run.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::phase::Phase;
use crate::spec_dir::{Artifact, SpecDir};

use super::state::GraphState;

const SPEC_SCHEMA: &str = include_str!("schemas/spec.json");
const RESEARCH_SCHEMA: &str = include_str!("schemas/research.json");
const PLAN_SCHEMA: &str = include_str!("schemas/plan.json");
const TASKS_SCHEMA: &str = include_str!("schemas/tasks.json");

fn schema_source(artifact: Artifact) -> &'static str {
    match artifact {
        Artifact::Spec => SPEC_SCHEMA,
        Artifact::Research => RESEARCH_SCHEMA,
        Artifact::Plan => PLAN_SCHEMA,
        Artifact::Tasks => TASKS_SCHEMA,
    }
}

/// Where the graph goes after validating a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRoute {
    Proceed,
    Repair(Artifact),
    Fail,
}

/// Validate YAML `content` against the schema for `artifact`. Returns the
/// violations; an empty list means valid.
pub fn validate_content(artifact: Artifact, content: &str) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(schema_source(artifact))
        .with_context(|| format!("Embedded schema for {} is not JSON", artifact.file_name()))?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;

    let instance: Value = match serde_yaml::from_str(content) {
        Ok(value) => value,
        Err(e) => return Ok(vec![format!("{} is not valid YAML: {}", artifact.file_name(), e)]),
    };
    if validator.is_valid(&instance) {
        return Ok(Vec::new());
    }
    Ok(validator
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect())
}

/// Violations of the first invalid artifact `phase` produces, if any.
pub fn validate_phase(spec_dir: &SpecDir, phase: Phase) -> Result<Option<(Artifact, Vec<String>)>> {
    for &artifact in phase.artifacts() {
        let errors = match spec_dir.read(artifact)? {
            Some(content) => validate_content(artifact, &content)?,
            None => vec![format!("{} was not written", artifact.file_name())],
        };
        if !errors.is_empty() {
            return Ok(Some((artifact, errors)));
        }
    }
    Ok(None)
}

/// Validate the phase's artifacts, update the retry counter on `state` and
/// pick the route.
pub fn check(state: &mut GraphState, phase: Phase, max_retries: u32) -> Result<ValidationRoute> {
    let spec_dir = SpecDir::new(&state.spec_dir);
    match validate_phase(&spec_dir, phase)? {
        None => {
            state.record_validation_success();
            Ok(ValidationRoute::Proceed)
        }
        Some((artifact, errors)) => {
            state.record_validation_failure(artifact, errors);
            if state.validation_retries >= max_retries {
                Ok(ValidationRoute::Fail)
            } else {
                Ok(ValidationRoute::Repair(artifact))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::test_state;
    use tempfile::tempdir;

    #[test]
    fn test_embedded_schemas_compile() {
        for artifact in [Artifact::Spec, Artifact::Research, Artifact::Plan, Artifact::Tasks] {
            let schema: Value = serde_json::from_str(schema_source(artifact)).unwrap();
            assert!(validator_for(&schema).is_ok(), "{:?}", artifact);
        }
    }

    #[test]
    fn test_valid_spec() {
        let errors = validate_content(
            Artifact::Spec,
            "name: Login\nsummary: Users can sign in\nopenQuestions:\n  - question: SSO?\n",
        )
        .unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_spec_missing_summary() {
        let errors = validate_content(Artifact::Spec, "name: Login\n").unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("summary"));
    }

    #[test]
    fn test_tasks_accept_numeric_ids() {
        let errors = validate_content(
            Artifact::Tasks,
            "tasks:\n  - id: 1\n    title: Add form\n  - id: 2\n    title: Wire API\n    dependsOn: [1]\n",
        )
        .unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let errors = validate_content(Artifact::Plan, "phases: []\n").unwrap();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_broken_yaml_is_a_violation_not_an_error() {
        let errors = validate_content(Artifact::Research, "decisions: [unclosed\n").unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("not valid YAML"));
    }

    #[test]
    fn test_validate_phase_reports_first_bad_artifact() {
        let dir = tempdir().unwrap();
        let spec_dir = SpecDir::new(dir.path());
        spec_dir
            .write(Artifact::Plan, "phases:\n  - id: p1\n    name: Backend\n")
            .unwrap();

        let (artifact, errors) = validate_phase(&spec_dir, Phase::Plan).unwrap().unwrap();
        assert_eq!(artifact, Artifact::Tasks);
        assert!(errors[0].contains("tasks.yaml was not written"));

        assert!(validate_phase(&spec_dir, Phase::Implement).unwrap().is_none());
    }

    #[test]
    fn test_check_routes_repair_then_fail() {
        let dir = tempdir().unwrap();
        let mut state = test_state();
        state.spec_dir = dir.path().to_path_buf();

        assert_eq!(
            check(&mut state, Phase::Research, 2).unwrap(),
            ValidationRoute::Repair(Artifact::Research)
        );
        assert_eq!(state.validation_retries, 1);
        assert_eq!(check(&mut state, Phase::Research, 2).unwrap(), ValidationRoute::Fail);
        assert_eq!(state.validation_retries, 2);

        SpecDir::new(dir.path())
            .write(Artifact::Research, "decisions:\n  - topic: db\n    decision: sqlite\n")
            .unwrap();
        assert_eq!(check(&mut state, Phase::Research, 2).unwrap(), ValidationRoute::Proceed);
        assert_eq!(state.validation_retries, 0);
        assert!(state.last_validation_errors.is_empty());
    }
}
