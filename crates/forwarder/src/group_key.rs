//! Group-key inference for incoming runs (§4.6.1).

use std::collections::HashMap;

use th_domain::run::Run;
use uuid::Uuid;

/// Chooses the group key a run should be bucketed under, given the keys
/// currently assigned to other runs (`run_to_key`) for the parent-bucket
/// lookup in rule 3.
pub fn resolve(run: &Run, run_to_key: &HashMap<Uuid, String>) -> String {
    if let Some(id) = run.extra.get("root_run_id").and_then(|v| v.as_str()) {
        return id.to_string();
    }
    if let Some(id) = run
        .extra
        .get("otlp.trace_id")
        .or_else(|| run.extra.get("trace.id"))
        .and_then(|v| v.as_str())
    {
        return id.to_string();
    }
    if let Some(parent) = run.parent_run_id {
        if let Some(existing) = run_to_key.get(&parent) {
            return existing.clone();
        }
        return parent.to_string();
    }
    run.id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use th_domain::run::{RunStatus, RunType};

    fn base(id: Uuid, parent: Option<Uuid>) -> Run {
        let now = Utc::now();
        Run {
            id,
            name: "r".into(),
            run_type: RunType::Chain,
            start_time: Some(now),
            end_time: None,
            parent_run_id: parent,
            status: RunStatus::Running,
            inputs: Default::default(),
            outputs: None,
            extra: Default::default(),
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
    fn root_run_id_takes_priority() {
        let mut run = base(Uuid::new_v4(), None);
        run.extra.insert("root_run_id".into(), serde_json::json!("grp-1"));
        run.extra.insert("otlp.trace_id".into(), serde_json::json!("trace-1"));
        assert_eq!(resolve(&run, &HashMap::new()), "grp-1");
    }

    #[test]
    fn otlp_trace_id_used_when_no_root_run_id() {
        let mut run = base(Uuid::new_v4(), None);
        run.extra.insert("otlp.trace_id".into(), serde_json::json!("trace-1"));
        assert_eq!(resolve(&run, &HashMap::new()), "trace-1");
    }

    #[test]
    fn legacy_trace_id_key_is_accepted() {
        let mut run = base(Uuid::new_v4(), None);
        run.extra.insert("trace.id".into(), serde_json::json!("legacy-1"));
        assert_eq!(resolve(&run, &HashMap::new()), "legacy-1");
    }

    #[test]
    fn parent_bucket_membership_reuses_existing_key() {
        let parent_id = Uuid::new_v4();
        let run = base(Uuid::new_v4(), Some(parent_id));
        let mut run_to_key = HashMap::new();
        run_to_key.insert(parent_id, "bucket-xyz".to_string());
        assert_eq!(resolve(&run, &run_to_key), "bucket-xyz");
    }

    #[test]
    fn unseen_parent_becomes_the_key() {
        let parent_id = Uuid::new_v4();
        let run = base(Uuid::new_v4(), Some(parent_id));
        assert_eq!(resolve(&run, &HashMap::new()), parent_id.to_string());
    }

    #[test]
    fn rootless_run_without_ids_uses_its_own_id() {
        let id = Uuid::new_v4();
        let run = base(id, None);
        assert_eq!(resolve(&run, &HashMap::new()), id.to_string());
    }
}
