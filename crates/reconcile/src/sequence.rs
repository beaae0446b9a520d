//! Message-Sequence Validation (§4.4.2): decide whether an incoming update
//! must be deferred against the currently persisted run.

use th_domain::run::{Run, RunUpdate};

/// `true` when `update` cannot be safely applied to `run` yet and must be
/// queued as a Deferred Update instead.
pub fn should_defer(run: &Run, update: &RunUpdate) -> bool {
    if update.end_time.is_some() && run.start_time.is_none() {
        return true;
    }
    if update.outputs.is_some() && run.start_time.is_none() {
        return true;
    }
    if update.end_time.is_some() && update.outputs.is_some() {
        let merged_start_time = update.start_time.or(run.start_time);
        if merged_start_time.is_none() {
            return true;
        }
    }
    false
}
