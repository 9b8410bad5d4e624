//! Prompt builders for each phase.

use crate::phase::Phase;
use crate::spec_dir::Artifact;

use super::state::GraphState;

fn artifact_list(state: &GraphState, phase: Phase) -> String {
    phase
        .artifacts()
        .iter()
        .map(|a| format!("- {}", state.spec_dir.join(a.file_name()).display()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn task(phase: Phase) -> &'static str {
    match phase {
        Phase::Analyze => {
            "Analyze the repository and the feature request. Refine spec.yaml: keep `name`, write a precise `summary`, and list anything unclear under `openQuestions` (each with a `question`)."
        }
        Phase::Requirements => {
            "Write the product requirements into spec.yaml under `requirements` (a list of short, testable statements). Incorporate any answered `openQuestions`."
        }
        Phase::Research => {
            "Research the codebase and relevant libraries. Record each technical decision in research.yaml under `decisions` (each with `topic`, `decision`, `rationale`)."
        }
        Phase::Plan => {
            "Write an implementation plan. plan.yaml holds `phases` (each with `id`, `name`, `description`); tasks.yaml holds `tasks` (each with `id`, `title`, `phase`, optional `dependsOn`)."
        }
        Phase::Implement => {
            "Implement the planned tasks in the working tree. Follow tasks.yaml in order, keep the build green, and add tests for new behavior. Do not commit."
        }
        Phase::Merge => "Prepare the change for review.",
    }
}

/// Prompt for executing `phase`, including rejection feedback when present.
pub fn phase_prompt(state: &GraphState, phase: Phase) -> String {
    let mut prompt = format!(
        "You are working on the feature \"{}\".\n\nFeature request:\n{}\n\nSpecification directory: {}\nWorking tree: {}\n\nPhase: {}\n{}\n",
        state.feature_name,
        state.description,
        state.spec_dir.display(),
        state.worktree_path.display(),
        phase,
        task(phase),
    );
    let artifacts = artifact_list(state, phase);
    if !artifacts.is_empty() {
        prompt.push_str(&format!("\nFiles to write (YAML):\n{}\n", artifacts));
    }
    if let Some(feedback) = &state.rejection_feedback {
        prompt.push_str(&format!(
            "\nA reviewer rejected the previous attempt at this phase. Address this feedback:\n{}\n",
            feedback
        ));
    }
    prompt
}

/// Prompt asking the agent to fix schema violations in `target`.
pub fn repair_prompt(state: &GraphState, phase: Phase, target: Artifact) -> String {
    let errors = state
        .last_validation_errors
        .iter()
        .map(|e| format!("- {}", e))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The {} phase wrote {} but it does not match the required schema (attempt {}).\n\nViolations:\n{}\n\nRewrite {} so that it is valid YAML and fixes every violation. Change nothing else.\n",
        phase,
        target.file_name(),
        state.validation_retries,
        errors,
        state.spec_dir.join(target.file_name()).display(),
    )
}

/// Prompt asking the agent to repair a failing CI run.
pub fn ci_fix_prompt(state: &GraphState, logs: &str, attempt: u32, max_attempts: u32) -> String {
    format!(
        "CI is failing on branch {} for the feature \"{}\" (fix attempt {} of {}).\n\nFailed job logs:\n```\n{}\n```\n\nFind the root cause and fix it in the working tree at {}. Do not disable or skip tests. Do not commit; the change will be committed and pushed for you.\n",
        state.branch,
        state.feature_name,
        attempt,
        max_attempts,
        logs,
        state.worktree_path.display(),
    )
}

pub fn commit_message(state: &GraphState) -> String {
    format!("feat: {}\n\n{}", state.feature_name, state.description)
}

pub fn pr_body(state: &GraphState) -> String {
    format!(
        "## Summary\n\n{}\n\nSpecification: `{}`\n\n---\n*Opened by Shipyard*",
        state.description,
        state.spec_dir.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::test_state;

    #[test]
    fn test_phase_prompt_lists_artifacts() {
        let state = test_state();
        let prompt = phase_prompt(&state, Phase::Plan);
        assert!(prompt.contains("/tmp/spec/plan.yaml"));
        assert!(prompt.contains("/tmp/spec/tasks.yaml"));
        assert!(prompt.contains("Add a login page"));
        assert!(!prompt.contains("rejected"));
    }

    #[test]
    fn test_phase_prompt_includes_rejection_feedback() {
        let mut state = test_state();
        state.rejection_feedback = Some("Cover SSO too".into());
        let prompt = phase_prompt(&state, Phase::Requirements);
        assert!(prompt.contains("rejected the previous attempt"));
        assert!(prompt.contains("Cover SSO too"));
    }

    #[test]
    fn test_repair_prompt_lists_violations() {
        let mut state = test_state();
        state.record_validation_failure(Artifact::Tasks, vec!["/tasks: missing".into()]);
        let prompt = repair_prompt(&state, Phase::Plan, Artifact::Tasks);
        assert!(prompt.contains("tasks.yaml"));
        assert!(prompt.contains("- /tasks: missing"));
        assert!(prompt.contains("attempt 1"));
    }

    #[test]
    fn test_ci_fix_prompt_carries_attempt() {
        let state = test_state();
        let prompt = ci_fix_prompt(&state, "error[E0308]", 2, 3);
        assert!(prompt.contains("fix attempt 2 of 3"));
        assert!(prompt.contains("error[E0308]"));
    }
}
