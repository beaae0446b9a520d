use std::sync::Arc;

use th_domain::config::Config;
use th_eventbus::Hub;
use th_reconcile::ReconcileEngine;
use th_store::RunStore;

/// Shared application state handed to every axum handler. Cheap to clone —
/// every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<RunStore>,
    pub engine: Arc<ReconcileEngine>,
    pub hub: Arc<Hub>,
}
