use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of operation a run represents, mirrored from the LangSmith run schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Chain,
    Llm,
    Tool,
    Retriever,
    Embedding,
    Prompt,
    Parser,
    Server,
    Client,
    Internal,
    Producer,
    Consumer,
    Custom,
}

impl Default for RunType {
    fn default() -> Self {
        RunType::Chain
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// A terminal status never transitions back to `running` (§4.4.3).
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// A single ordered event recorded on a run (span event, log line, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventRecord {
    pub name: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// The central entity: a node in a trace tree, either a root (trace) or a
/// child (span). See data model §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub name: String,
    pub run_type: RunType,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub parent_run_id: Option<Uuid>,
    pub status: RunStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
    #[serde(default)]
    pub serialized: Option<Value>,
    #[serde(default)]
    pub events: Vec<RunEventRecord>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub reference_example_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Invariants 1/2 (§3.2, §8): does the persisted state satisfy the
    /// completion-by-pattern rule for `completed`?
    pub fn satisfies_completed(&self) -> bool {
        self.end_time.is_some() && self.outputs.is_some() && self.error.is_none()
    }

    /// Invariant 2/§8: does the persisted state satisfy `failed`?
    pub fn satisfies_failed(&self) -> bool {
        self.end_time.is_some() && self.error.is_some()
    }

    /// First-matching-rule status recomputation, §4.4.3/§4.4.4.
    pub fn expected_status(&self) -> RunStatus {
        if self.error.is_some() {
            RunStatus::Failed
        } else if self.end_time.is_some() && self.outputs.is_some() {
            RunStatus::Completed
        } else {
            RunStatus::Running
        }
    }
}

/// Create payload: requires `id, name, run_type, start_time, inputs` (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreate {
    pub id: Uuid,
    pub name: String,
    pub run_type: RunType,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_run_id: Option<Uuid>,
    #[serde(default)]
    pub outputs: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
    #[serde(default)]
    pub serialized: Option<Value>,
    #[serde(default)]
    pub events: Vec<RunEventRecord>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub reference_example_id: Option<Uuid>,
    /// LangSmith compatibility: overrides `project_name` for the whole batch
    /// when present on the first `post` element (§4.1).
    #[serde(default)]
    pub session_name: Option<String>,
}

/// Update payload: requires only `id`; every other mutable field is optional
/// and applied as a partial patch (§4.3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunUpdate {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run_type: Option<RunType>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub extra: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub events: Option<Vec<RunEventRecord>>,
    #[serde(default)]
    pub parent_run_id: Option<Uuid>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub reference_example_id: Option<Uuid>,
    #[serde(default)]
    pub session_name: Option<String>,
}

/// Tagged union accepted by the Reconciliation Engine's `upsert` (§4.4.1,
/// §9 "dynamic typing → tagged variants"). Both translators (C2, C3)
/// produce these; only the Reconciliation Engine interprets them.
#[derive(Debug, Clone)]
pub enum UpsertInput {
    Create(RunCreate),
    Update(RunUpdate),
}

impl UpsertInput {
    pub fn id(&self) -> Uuid {
        match self {
            UpsertInput::Create(c) => c.id,
            UpsertInput::Update(u) => u.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RunType::Llm).unwrap(), "\"llm\"");
        assert_eq!(serde_json::to_string(&RunType::Chain).unwrap(), "\"chain\"");
    }

    #[test]
    fn status_is_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    fn base_run() -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            name: "root".into(),
            run_type: RunType::Chain,
            start_time: Some(now),
            end_time: None,
            parent_run_id: None,
            status: RunStatus::Running,
            inputs: HashMap::new(),
            outputs: None,
            extra: HashMap::new(),
            serialized: None,
            events: Vec::new(),
            tags: Vec::new(),
            error: None,
            project_name: None,
            reference_example_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expected_status_running_without_completion_fields() {
        let run = base_run();
        assert_eq!(run.expected_status(), RunStatus::Running);
    }

    #[test]
    fn expected_status_completed_when_end_and_outputs_present() {
        let mut run = base_run();
        run.end_time = Some(Utc::now());
        run.outputs = Some(HashMap::from([("a".to_string(), Value::from(1))]));
        assert_eq!(run.expected_status(), RunStatus::Completed);
        assert!(run.satisfies_completed());
    }

    #[test]
    fn expected_status_failed_when_error_present() {
        let mut run = base_run();
        run.end_time = Some(Utc::now());
        run.error = Some("boom".into());
        assert_eq!(run.expected_status(), RunStatus::Failed);
        assert!(run.satisfies_failed());
    }

    #[test]
    fn error_takes_precedence_over_completion_fields() {
        let mut run = base_run();
        run.end_time = Some(Utc::now());
        run.outputs = Some(HashMap::new());
        run.error = Some("boom".into());
        assert_eq!(run.expected_status(), RunStatus::Failed);
    }
}
