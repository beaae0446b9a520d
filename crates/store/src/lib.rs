//! Durable, queryable store of runs (§4.7). One row per run; idempotent
//! upsert primitives, hierarchy fetch, and stats aggregation. Unlike the
//! bounded in-memory ring buffer this crate's idioms are drawn from, this
//! store is unbounded and durable for the lifetime of the process: every
//! run is retained, backed by an append-only JSONL change log replayed at
//! startup (§6.6).

mod lock;

pub use lock::KeyedLocks;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use th_domain::error::{Error, Result};
use th_domain::run::{Run, RunStatus, RunType};

/// Filters accepted by `list_roots`/`count_roots` (§4.7).
#[derive(Debug, Clone, Default)]
pub struct RunFilters {
    pub project_name: Option<String>,
    pub status: Option<RunStatus>,
    pub search: Option<String>,
    pub start_time_gte: Option<DateTime<Utc>>,
    pub start_time_lte: Option<DateTime<Utc>>,
}

impl RunFilters {
    fn matches(&self, run: &Run) -> bool {
        if let Some(project) = &self.project_name {
            if run.project_name.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if run.status != status {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let name_hit = run.name.to_lowercase().contains(&needle);
            let project_hit = run
                .project_name
                .as_ref()
                .is_some_and(|p| p.to_lowercase().contains(&needle));
            if !name_hit && !project_hit {
                return false;
            }
        }
        if let Some(gte) = self.start_time_gte {
            match run.start_time {
                Some(t) if t >= gte => {}
                _ => return false,
            }
        }
        if let Some(lte) = self.start_time_lte {
            match run.start_time {
                Some(t) if t <= lte => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_runs: usize,
    pub total_traces: usize,
    pub recent_runs_24h: usize,
    pub status_distribution: HashMap<String, usize>,
    pub run_type_distribution: HashMap<String, usize>,
    pub project_distribution: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectActivity {
    pub name: String,
    pub total_runs: usize,
    pub total_traces: usize,
    pub last_activity: DateTime<Utc>,
}

struct Inner {
    runs: HashMap<Uuid, Run>,
    /// parent_run_id -> child ids, the index backing `hierarchy` (§4.7, §6.6).
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            runs: HashMap::new(),
            children: HashMap::new(),
        }
    }

    fn index_insert(&mut self, run: &Run) {
        if let Some(parent) = run.parent_run_id {
            let siblings = self.children.entry(parent).or_default();
            if !siblings.contains(&run.id) {
                siblings.push(run.id);
            }
        }
    }

    fn is_root(&self, run: &Run) -> bool {
        match run.parent_run_id {
            None => true,
            Some(parent) => !self.runs.contains_key(&parent),
        }
    }
}

/// The Run Store (C1). Backed by an in-memory map guarded by a sync
/// `RwLock` (reads and index lookups never cross an await point) plus an
/// append-only JSONL log on disk.
pub struct RunStore {
    inner: RwLock<Inner>,
    log_path: PathBuf,
    log_file: parking_lot::Mutex<std::fs::File>,
    pub locks: KeyedLocks,
}

impl RunStore {
    /// Open (or create) the store rooted at `state_dir`, replaying
    /// `runs.jsonl` if present. Each line is a full `Run` snapshot; the
    /// last line for a given id wins (§6.6).
    pub fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(Error::Io)?;
        let log_path = state_dir.join("runs.jsonl");

        let mut runs: HashMap<Uuid, Run> = HashMap::new();
        if log_path.exists() {
            let file = std::fs::File::open(&log_path).map_err(Error::Io)?;
            for line in std::io::BufReader::new(file).lines() {
                let line = line.map_err(Error::Io)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Run>(&line) {
                    Ok(run) => {
                        runs.insert(run.id, run);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed run log line");
                    }
                }
            }
        }

        let mut inner = Inner::new();
        for run in runs.values() {
            inner.index_insert(run);
        }
        inner.runs = runs;

        tracing::info!(runs = inner.runs.len(), path = %log_path.display(), "run store loaded");

        let store = Self {
            inner: RwLock::new(inner),
            log_file: parking_lot::Mutex::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
                    .map_err(Error::Io)?,
            ),
            log_path,
            locks: KeyedLocks::new(),
        };
        store.compact()?;
        Ok(store)
    }

    /// Rewrite the log with exactly one line per current run, collapsing
    /// history (the durability-snapshot half of §6.6's append+compact design).
    pub fn compact(&self) -> Result<()> {
        let inner = self.inner.read();
        let tmp_path = self.log_path.with_extension("jsonl.tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path).map_err(Error::Io)?;
            for run in inner.runs.values() {
                let line = serde_json::to_string(run).map_err(Error::Json)?;
                writeln!(tmp, "{line}").map_err(Error::Io)?;
            }
        }
        std::fs::rename(&tmp_path, &self.log_path).map_err(Error::Io)?;
        *self.log_file.lock() = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(Error::Io)?;
        Ok(())
    }

    fn append_log(&self, run: &Run) -> Result<()> {
        let line = serde_json::to_string(run).map_err(Error::Json)?;
        let mut file = self.log_file.lock();
        writeln!(file, "{line}").map_err(Error::Io)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Run> {
        self.inner.read().runs.get(&id).cloned()
    }

    /// Fails when `id` already exists (§4.7).
    pub fn insert(&self, run: Run) -> Result<Run> {
        {
            let mut inner = self.inner.write();
            if inner.runs.contains_key(&run.id) {
                return Err(Error::AlreadyExists(run.id.to_string()));
            }
            inner.index_insert(&run);
            inner.runs.insert(run.id, run.clone());
        }
        self.append_log(&run)?;
        Ok(run)
    }

    /// Atomic whole-record replacement; the Reconciliation Engine computes
    /// the merged `Run` and hands it here. Returns `None` if absent.
    pub fn replace(&self, id: Uuid, run: Run) -> Result<Option<Run>> {
        {
            let mut inner = self.inner.write();
            if !inner.runs.contains_key(&id) {
                return Ok(None);
            }
            inner.index_insert(&run);
            inner.runs.insert(id, run.clone());
        }
        self.append_log(&run)?;
        Ok(Some(run))
    }

    pub fn list_roots(&self, filters: &RunFilters, pagination: Pagination) -> Vec<Run> {
        let inner = self.inner.read();
        let mut roots: Vec<&Run> = inner
            .runs
            .values()
            .filter(|r| inner.is_root(r) && filters.matches(r))
            .collect();
        roots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        roots
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .cloned()
            .collect()
    }

    pub fn count_roots(&self, filters: &RunFilters) -> usize {
        let inner = self.inner.read();
        inner
            .runs
            .values()
            .filter(|r| inner.is_root(r) && filters.matches(r))
            .count()
    }

    /// All descendants of `root_id` inclusive, via iterative BFS with a
    /// visited set (cycle-safe per §9's redesign note).
    pub fn hierarchy(&self, root_id: Uuid) -> Vec<Run> {
        let inner = self.inner.read();
        let Some(root) = inner.runs.get(&root_id) else {
            return Vec::new();
        };

        let mut visited = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        let mut out = Vec::new();

        visited.insert(root_id);
        queue.push_back(root_id);
        out.push(root.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(children) = inner.children.get(&current) {
                for &child_id in children {
                    if visited.insert(child_id) {
                        if let Some(child) = inner.runs.get(&child_id) {
                            out.push(child.clone());
                            queue.push_back(child_id);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        let now = Utc::now();
        let mut stats = StoreStats {
            total_runs: inner.runs.len(),
            ..Default::default()
        };
        for run in inner.runs.values() {
            if inner.is_root(run) {
                stats.total_traces += 1;
            }
            if run.created_at > now - Duration::hours(24) {
                stats.recent_runs_24h += 1;
            }
            *stats
                .status_distribution
                .entry(status_label(run.status).to_string())
                .or_insert(0) += 1;
            *stats
                .run_type_distribution
                .entry(run_type_label(run.run_type).to_string())
                .or_insert(0) += 1;
            if let Some(project) = &run.project_name {
                *stats.project_distribution.entry(project.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Top project summaries by most recent activity within `days` (§4.8).
    pub fn project_activity(&self, days: i64, top_n: usize) -> Vec<ProjectActivity> {
        let inner = self.inner.read();
        let cutoff = Utc::now() - Duration::days(days);
        let mut by_project: HashMap<String, ProjectActivity> = HashMap::new();

        for run in inner.runs.values() {
            if run.created_at < cutoff {
                continue;
            }
            let name = run.project_name.clone().unwrap_or_else(|| "unknown".into());
            let entry = by_project.entry(name.clone()).or_insert_with(|| ProjectActivity {
                name,
                total_runs: 0,
                total_traces: 0,
                last_activity: run.created_at,
            });
            entry.total_runs += 1;
            if inner.is_root(run) {
                entry.total_traces += 1;
            }
            if run.created_at > entry.last_activity {
                entry.last_activity = run.created_at;
            }
        }

        let mut activity: Vec<_> = by_project.into_values().collect();
        activity.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        activity.truncate(top_n);
        activity
    }

    /// Transition every `running` run with `start_time < now - T` to
    /// `failed` (§4.4.6). Returns the number of runs transitioned.
    pub fn mark_stale_as_failed(&self, timeout_minutes: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::minutes(timeout_minutes);
        let stale_ids: Vec<Uuid> = {
            let inner = self.inner.read();
            inner
                .runs
                .values()
                .filter(|r| {
                    r.status == RunStatus::Running && r.start_time.is_some_and(|t| t < cutoff)
                })
                .map(|r| r.id)
                .collect()
        };

        let mut updated = Vec::with_capacity(stale_ids.len());
        {
            let mut inner = self.inner.write();
            let now = Utc::now();
            for id in &stale_ids {
                if let Some(run) = inner.runs.get_mut(id) {
                    run.status = RunStatus::Failed;
                    run.error = Some(format!("timed out after {timeout_minutes} minutes"));
                    run.end_time = Some(now);
                    run.updated_at = now;
                    updated.push(run.clone());
                }
            }
        }
        for run in &updated {
            self.append_log(run)?;
        }
        Ok(updated.len())
    }
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    }
}

fn run_type_label(run_type: RunType) -> &'static str {
    match run_type {
        RunType::Chain => "chain",
        RunType::Llm => "llm",
        RunType::Tool => "tool",
        RunType::Retriever => "retriever",
        RunType::Embedding => "embedding",
        RunType::Prompt => "prompt",
        RunType::Parser => "parser",
        RunType::Server => "server",
        RunType::Client => "client",
        RunType::Internal => "internal",
        RunType::Producer => "producer",
        RunType::Consumer => "consumer",
        RunType::Custom => "custom",
    }
}
