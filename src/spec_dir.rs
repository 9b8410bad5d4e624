//! Per-feature specification directory.
//!
//! Phase prompts tell the agent to read and write these files; the core only
//! seeds `spec.yaml`, validates the files, and writes approval answers back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::util::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Spec,
    Research,
    Plan,
    Tasks,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Spec => "spec.yaml",
            Self::Research => "research.yaml",
            Self::Plan => "plan.yaml",
            Self::Tasks => "tasks.yaml",
        }
    }
}

/// One answer to an open question in `spec.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct SpecDir {
    root: PathBuf,
}

impl SpecDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.root.join(artifact.file_name())
    }

    /// Contents of an artifact, or `None` when it has not been written.
    pub fn read(&self, artifact: Artifact) -> Result<Option<String>> {
        let path = self.path(artifact);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn write(&self, artifact: Artifact, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        write_atomic(&self.path(artifact), content.as_bytes())
    }

    /// Create the directory with a minimal `spec.yaml` the analyze phase refines.
    pub fn seed(&self, name: &str, description: &str) -> Result<()> {
        if self.path(Artifact::Spec).exists() {
            return Ok(());
        }
        let mut doc = Mapping::new();
        doc.insert("name".into(), name.into());
        doc.insert("summary".into(), description.into());
        doc.insert("openQuestions".into(), Value::Sequence(Vec::new()));
        let yaml = serde_yaml::to_string(&Value::Mapping(doc)).context("Failed to render spec.yaml")?;
        self.write(Artifact::Spec, &yaml)
    }

    /// Write answers into `spec.yaml` under `openQuestions`. Questions are
    /// matched by text; unmatched answers are appended as new entries.
    pub fn apply_answers(&self, answers: &[QuestionAnswer]) -> Result<()> {
        if answers.is_empty() {
            return Ok(());
        }
        let content = self
            .read(Artifact::Spec)?
            .context("spec.yaml does not exist; nothing to answer")?;
        let mut doc: Value = serde_yaml::from_str(&content).context("Failed to parse spec.yaml")?;
        let map = doc
            .as_mapping_mut()
            .context("spec.yaml is not a mapping")?;
        let questions = map
            .entry("openQuestions".into())
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if !questions.is_sequence() {
            *questions = Value::Sequence(Vec::new());
        }
        let entries = questions
            .as_sequence_mut()
            .context("openQuestions is not a list")?;

        for qa in answers {
            let existing = entries.iter_mut().find(|entry| {
                entry.get("question").and_then(Value::as_str) == Some(qa.question.as_str())
            });
            match existing.and_then(Value::as_mapping_mut) {
                Some(entry) => {
                    entry.insert("answer".into(), qa.answer.clone().into());
                }
                None => {
                    let mut entry = Mapping::new();
                    entry.insert("question".into(), qa.question.clone().into());
                    entry.insert("answer".into(), qa.answer.clone().into());
                    entries.push(Value::Mapping(entry));
                }
            }
        }

        let yaml = serde_yaml::to_string(&doc).context("Failed to render spec.yaml")?;
        self.write(Artifact::Spec, &yaml)
    }
}

/// Parse an answers file: either a list of `{question, answer}` or a
/// `question: answer` mapping. YAML is a superset of JSON, so both work.
pub fn parse_answers(content: &str) -> Result<Vec<QuestionAnswer>> {
    if let Ok(list) = serde_yaml::from_str::<Vec<QuestionAnswer>>(content) {
        return Ok(list);
    }
    let map: std::collections::BTreeMap<String, String> =
        serde_yaml::from_str(content).context("Answers must be a list or a question: answer map")?;
    Ok(map
        .into_iter()
        .map(|(question, answer)| QuestionAnswer { question, answer })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_seed_writes_spec_once() {
        let dir = tempdir().unwrap();
        let spec = SpecDir::new(dir.path().join("feat"));
        spec.seed("Login", "Add login").unwrap();
        let first = spec.read(Artifact::Spec).unwrap().unwrap();
        assert!(first.contains("summary: Add login"));

        spec.write(Artifact::Spec, "name: changed\n").unwrap();
        spec.seed("Login", "Add login").unwrap();
        assert_eq!(spec.read(Artifact::Spec).unwrap().unwrap(), "name: changed\n");
    }

    #[test]
    fn test_read_missing_artifact_is_none() {
        let dir = tempdir().unwrap();
        let spec = SpecDir::new(dir.path());
        assert!(spec.read(Artifact::Plan).unwrap().is_none());
    }

    #[test]
    fn test_apply_answers_updates_and_appends() {
        let dir = tempdir().unwrap();
        let spec = SpecDir::new(dir.path());
        spec.write(
            Artifact::Spec,
            "name: x\nsummary: y\nopenQuestions:\n  - question: Which DB?\n",
        )
        .unwrap();
        spec.apply_answers(&[
            QuestionAnswer {
                question: "Which DB?".into(),
                answer: "Postgres".into(),
            },
            QuestionAnswer {
                question: "Rate limit?".into(),
                answer: "100/min".into(),
            },
        ])
        .unwrap();

        let doc: Value =
            serde_yaml::from_str(&spec.read(Artifact::Spec).unwrap().unwrap()).unwrap();
        let questions = doc["openQuestions"].as_sequence().unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0]["answer"].as_str(), Some("Postgres"));
        assert_eq!(questions[1]["question"].as_str(), Some("Rate limit?"));
        assert_eq!(doc["name"].as_str(), Some("x"));
    }

    #[test]
    fn test_apply_answers_requires_spec() {
        let dir = tempdir().unwrap();
        let spec = SpecDir::new(dir.path());
        let err = spec
            .apply_answers(&[QuestionAnswer {
                question: "q".into(),
                answer: "a".into(),
            }])
            .unwrap_err();
        assert!(err.to_string().contains("spec.yaml does not exist"));
    }

    #[test]
    fn test_parse_answers_both_shapes() {
        let list = parse_answers("- question: A?\n  answer: yes\n").unwrap();
        assert_eq!(list[0].answer, "yes");
        let map = parse_answers(r#"{"B?": "no"}"#).unwrap();
        assert_eq!(map[0].question, "B?");
        assert!(parse_answers("42").is_err());
    }
}
