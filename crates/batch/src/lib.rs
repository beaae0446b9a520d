//! Batch Translator (C3): the LangSmith-compatible `post`/`patch` payload.

use serde::{Deserialize, Serialize};

use th_domain::run::{RunCreate, RunUpdate, UpsertInput};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchRequest {
    #[serde(default)]
    pub post: Vec<RunCreate>,
    #[serde(default)]
    pub patch: Vec<RunUpdate>,
    #[serde(default)]
    pub pre_sampled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchResponse {
    pub success: bool,
    pub created_count: usize,
    pub updated_count: usize,
    pub errors: Vec<String>,
}

/// Apply the project-name policy (§4.1): if the first `post` element
/// carries a `session_name`, every element in both arrays has its
/// `project_name` overwritten with that value.
pub fn apply_project_name_policy(req: &mut BatchRequest) {
    let Some(session_name) = req.post.first().and_then(|c| c.session_name.clone()) else {
        return;
    };
    for create in &mut req.post {
        create.project_name = Some(session_name.clone());
    }
    for update in &mut req.patch {
        update.project_name = Some(session_name.clone());
    }
}

/// Flatten a batch request into the ordered sequence of upserts the
/// Reconciliation Engine should apply. Creates precede updates for the
/// same id within a batch (§5 ordering guarantee).
pub fn into_upsert_items(req: BatchRequest) -> Vec<UpsertInput> {
    let mut items: Vec<UpsertInput> = Vec::with_capacity(req.post.len() + req.patch.len());
    items.extend(req.post.into_iter().map(UpsertInput::Create));
    items.extend(req.patch.into_iter().map(UpsertInput::Update));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn create(session_name: Option<&str>) -> RunCreate {
        RunCreate {
            id: Uuid::new_v4(),
            name: "root".into(),
            run_type: th_domain::run::RunType::Chain,
            start_time: Utc::now(),
            inputs: HashMap::new(),
            end_time: None,
            parent_run_id: None,
            outputs: None,
            extra: HashMap::new(),
            serialized: None,
            events: Vec::new(),
            tags: Vec::new(),
            error: None,
            project_name: None,
            reference_example_id: None,
            session_name: session_name.map(|s| s.to_string()),
        }
    }

    #[test]
    fn project_name_policy_overrides_every_element() {
        let mut req = BatchRequest {
            post: vec![create(Some("proj-a")), create(None)],
            patch: vec![RunUpdate {
                id: Uuid::new_v4(),
                ..Default::default()
            }],
            pre_sampled: false,
        };
        apply_project_name_policy(&mut req);
        assert_eq!(req.post[0].project_name.as_deref(), Some("proj-a"));
        assert_eq!(req.post[1].project_name.as_deref(), Some("proj-a"));
        assert_eq!(req.patch[0].project_name.as_deref(), Some("proj-a"));
    }

    #[test]
    fn project_name_policy_noop_without_session_name() {
        let mut req = BatchRequest {
            post: vec![create(None)],
            patch: vec![],
            pre_sampled: false,
        };
        apply_project_name_policy(&mut req);
        assert!(req.post[0].project_name.is_none());
    }

    #[test]
    fn creates_precede_updates_in_output_order() {
        let c = create(None);
        let c_id = c.id;
        let u = RunUpdate {
            id: Uuid::new_v4(),
            ..Default::default()
        };
        let req = BatchRequest {
            post: vec![c],
            patch: vec![u],
            pre_sampled: false,
        };
        let items = into_upsert_items(req);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], UpsertInput::Create(c) if c.id == c_id));
        assert!(matches!(&items[1], UpsertInput::Update(_)));
    }
}
