//! Update merge (§4.3, §4.4.1) and status transition (§4.4.3, §4.4.4).

use std::collections::HashSet;

use th_domain::run::{Run, RunStatus, RunUpdate};

/// Field-level diff recorded for `trace.updated` events (§4.5).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub fields: Vec<&'static str>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Applies `update` onto `run` in place per §4.3/§4.4.1's merge rules.
/// `extra` is dict-merged; `tags`/`events` are replaced wholesale; scalar
/// fields are overwritten when present on the update. Returns the set of
/// changed field names.
pub fn apply_update(run: &mut Run, update: RunUpdate) -> ChangeSet {
    let mut changed: HashSet<&'static str> = HashSet::new();

    if let Some(name) = update.name {
        if run.name != name {
            changed.insert("name");
        }
        run.name = name;
    }
    if let Some(run_type) = update.run_type {
        if run.run_type != run_type {
            changed.insert("run_type");
        }
        run.run_type = run_type;
    }
    if let Some(start_time) = update.start_time {
        if run.start_time != Some(start_time) {
            changed.insert("start_time");
        }
        run.start_time = Some(start_time);
    }
    if let Some(end_time) = update.end_time {
        if run.end_time != Some(end_time) {
            changed.insert("end_time");
        }
        run.end_time = Some(end_time);
    }
    if let Some(outputs) = update.outputs {
        changed.insert("outputs");
        run.outputs = Some(outputs);
    }
    if let Some(error) = update.error {
        changed.insert("error");
        run.error = Some(error);
    }
    if let Some(extra) = update.extra {
        changed.insert("extra");
        run.extra.extend(extra);
    }
    if let Some(tags) = update.tags {
        changed.insert("tags");
        run.tags = tags;
    }
    if let Some(events) = update.events {
        changed.insert("events");
        run.events = events;
    }
    if let Some(parent_run_id) = update.parent_run_id {
        if run.parent_run_id != Some(parent_run_id) {
            changed.insert("parent_run_id");
        }
        run.parent_run_id = Some(parent_run_id);
    }
    if let Some(project_name) = update.project_name {
        if run.project_name.as_deref() != Some(project_name.as_str()) {
            changed.insert("project_name");
        }
        run.project_name = Some(project_name);
    }
    if let Some(reference_example_id) = update.reference_example_id {
        run.reference_example_id = Some(reference_example_id);
        changed.insert("reference_example_id");
    }

    ChangeSet {
        fields: changed.into_iter().collect(),
    }
}

/// Recomputes status from the persisted fields and writes it back if it
/// differs, refusing to downgrade a terminal run to `running` (§4.4.3's
/// forbidden transition, decision recorded in DESIGN.md §9). The same
/// recomputation implements both the post-merge transition (§4.4.3) and the
/// idempotent Status-Consistency Validation pass (§4.4.4) — there is only
/// one rule, applied at both call sites.
pub fn reconcile_status(run: &mut Run) -> bool {
    let previous = run.status;
    let next = run.expected_status();
    if previous.is_terminal() && next == RunStatus::Running {
        tracing::warn!(run_id = %run.id, from = ?previous, "dropping status downgrade to running");
        return false;
    }
    if next != previous {
        run.status = next;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn base_run() -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            name: "r".into(),
            run_type: th_domain::run::RunType::Chain,
            start_time: Some(now),
            end_time: None,
            parent_run_id: None,
            status: RunStatus::Running,
            inputs: HashMap::new(),
            outputs: None,
            extra: HashMap::from([("a".to_string(), serde_json::json!(1))]),
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
    fn extra_is_dict_merged_not_replaced() {
        let mut run = base_run();
        let update = RunUpdate {
            id: run.id,
            extra: Some(HashMap::from([("b".to_string(), serde_json::json!(2))])),
            ..Default::default()
        };
        apply_update(&mut run, update);
        assert_eq!(run.extra.len(), 2);
        assert_eq!(run.extra["a"], serde_json::json!(1));
    }

    #[test]
    fn tags_are_replaced_wholesale() {
        let mut run = base_run();
        run.tags = vec!["old".into()];
        let update = RunUpdate {
            id: run.id,
            tags: Some(vec!["new".into()]),
            ..Default::default()
        };
        apply_update(&mut run, update);
        assert_eq!(run.tags, vec!["new".to_string()]);
    }

    #[test]
    fn reconcile_status_completes_when_fields_present() {
        let mut run = base_run();
        run.end_time = Some(Utc::now());
        run.outputs = Some(HashMap::new());
        assert!(reconcile_status(&mut run));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn reconcile_status_refuses_downgrade_from_completed() {
        let mut run = base_run();
        run.status = RunStatus::Completed;
        run.end_time = Some(Utc::now());
        run.outputs = Some(HashMap::new());
        run.outputs = None; // now looks like `running` per the raw fields
        assert!(!reconcile_status(&mut run));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn reconcile_status_is_idempotent() {
        let mut run = base_run();
        run.end_time = Some(Utc::now());
        run.outputs = Some(HashMap::new());
        reconcile_status(&mut run);
        assert!(!reconcile_status(&mut run));
    }
}
