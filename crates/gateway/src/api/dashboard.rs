//! Dashboard query surface (§4.8, §6.3): root listing, trace hierarchy,
//! summary stats, and the manual stale-run cleanup trigger.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use th_domain::run::{Run, RunStatus};
use th_domain::Result;
use th_store::{Pagination, ProjectActivity, RunFilters, StoreStats};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RootsQuery {
    pub project_name: Option<String>,
    pub status: Option<RunStatus>,
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub start_time_gte: Option<DateTime<Utc>>,
    pub start_time_lte: Option<DateTime<Utc>>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct RootRunsResponse {
    pub runs: Vec<Run>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

pub async fn list_roots(
    State(state): State<AppState>,
    Query(q): Query<RootsQuery>,
) -> Result<Json<RootRunsResponse>> {
    if q.limit < 1 {
        return Err(th_domain::Error::Validation("limit must be >= 1".into()));
    }
    let limit = q.limit.min(200);
    let filters = RunFilters {
        project_name: q.project_name,
        status: q.status,
        search: q.search,
        start_time_gte: q.start_time_gte,
        start_time_lte: q.start_time_lte,
    };
    let pagination = Pagination { limit, offset: q.offset };

    let runs = state.store.list_roots(&filters, pagination);
    let total = state.store.count_roots(&filters);
    let has_more = q.offset + runs.len() < total;

    Ok(Json(RootRunsResponse {
        runs,
        total,
        limit,
        offset: q.offset,
        has_more,
    }))
}

#[derive(Debug, Serialize)]
pub struct RunNode {
    #[serde(flatten)]
    pub run: Run,
    pub duration_ms: Option<i64>,
    pub children: Vec<RunNode>,
}

#[derive(Debug, Serialize)]
pub struct RunHierarchyResponse {
    pub root: Option<RunNode>,
    pub max_depth: usize,
    pub total_runs: usize,
}

pub async fn hierarchy(
    State(state): State<AppState>,
    Path(trace_id): Path<Uuid>,
) -> Result<Json<RunHierarchyResponse>> {
    let runs = state.store.hierarchy(trace_id);
    if runs.is_empty() {
        return Ok(Json(RunHierarchyResponse {
            root: None,
            max_depth: 0,
            total_runs: 0,
        }));
    }

    let root_run = runs
        .iter()
        .find(|r| r.id == trace_id)
        .cloned()
        .unwrap_or_else(|| runs[0].clone());
    let total_runs = runs.len();
    let mut max_depth = 0;
    let root = build_tree(root_run, &children_by_parent(&runs), 0, &mut max_depth);

    Ok(Json(RunHierarchyResponse {
        root: Some(root),
        max_depth,
        total_runs,
    }))
}

/// Groups a flat descendant list by `parent_run_id`, each group sorted by
/// `start_time` ascending (§4.8).
fn children_by_parent(runs: &[Run]) -> HashMap<Uuid, Vec<Run>> {
    let mut by_parent: HashMap<Uuid, Vec<Run>> = HashMap::new();
    for run in runs {
        if let Some(parent) = run.parent_run_id {
            by_parent.entry(parent).or_default().push(run.clone());
        }
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by_key(|r| r.start_time);
    }
    by_parent
}

/// Recursively assembles a `RunNode` tree rooted at `run`, tracking the
/// deepest level reached.
fn build_tree(run: Run, by_parent: &HashMap<Uuid, Vec<Run>>, depth: usize, max_depth: &mut usize) -> RunNode {
    *max_depth = (*max_depth).max(depth);
    let duration_ms = match (run.start_time, run.end_time) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
        _ => None,
    };
    let children = by_parent
        .get(&run.id)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|child| build_tree(child, by_parent, depth + 1, max_depth))
        .collect();
    RunNode { run, duration_ms, children }
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    #[serde(flatten)]
    pub stats: StoreStats,
    pub top_projects: Vec<ProjectActivity>,
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<DashboardSummary>> {
    state
        .engine
        .sweep_stale(state.config.stale_run.timeout_minutes_default)
        .await?;

    let stats = state.store.stats();
    let top_projects = state.store.project_activity(7, 10);
    Ok(Json(DashboardSummary { stats, top_projects }))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub timeout_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub swept: usize,
}

pub async fn cleanup_stale_runs(
    State(state): State<AppState>,
    Query(q): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>> {
    let timeout_minutes = q
        .timeout_minutes
        .unwrap_or(state.config.stale_run.timeout_minutes_default);
    let swept = state.engine.sweep_stale(timeout_minutes).await?;
    Ok(Json(CleanupResponse { swept }))
}
