//! Run construction for the two "absent" branches of the upsert contract
//! (§4.4.1 step 2): a genuine create, or a synthesized create for an update
//! that outran its create.

use chrono::Utc;
use th_domain::run::{Run, RunCreate, RunStatus, RunType, RunUpdate};

use crate::apply::apply_update;

pub fn run_from_create(create: RunCreate) -> Run {
    let now = Utc::now();
    let mut run = Run {
        id: create.id,
        name: create.name,
        run_type: create.run_type,
        start_time: Some(create.start_time),
        end_time: create.end_time,
        parent_run_id: create.parent_run_id,
        status: RunStatus::Running,
        inputs: create.inputs,
        outputs: create.outputs,
        extra: create.extra,
        serialized: create.serialized,
        events: create.events,
        tags: create.tags,
        error: create.error,
        project_name: create.project_name,
        reference_example_id: create.reference_example_id,
        created_at: now,
        updated_at: now,
    };
    run.status = run.expected_status();
    run
}

/// Out-of-order arrival (§8 scenario S2): an update reaches the server
/// before its create. Defaults are placeholders only — a later real create
/// for the same id is never expected (creates are idempotent-or-error), so
/// this mislabeling (generic name, `chain` run type) can persist until a
/// human or the original producer corrects it via a follow-up update. This
/// is inherited deliberately rather than treated as a bug (§9).
pub fn synthesize_from_update(update: RunUpdate) -> Run {
    let now = Utc::now();
    let mut run = Run {
        id: update.id,
        name: format!("Trace {}", update.id),
        run_type: RunType::Chain,
        start_time: Some(now),
        end_time: None,
        parent_run_id: None,
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
    };
    apply_update(&mut run, update);
    run.status = run.expected_status();
    run
}
