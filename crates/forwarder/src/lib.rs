//! Forward Grouper (C6): groups runs by trace, debounces arrivals, and
//! reassembles + re-emits a synthetic OTel trace to a downstream collector
//! on flush (§4.6).

mod attrs;
mod bucket;
mod emit;
mod group_key;
mod http_client;
mod steps;

pub use attrs::AttrCaps;
pub use http_client::{OtlpHttpSender, ReqwestOtlpSender};

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use th_domain::run::Run;
use th_reconcile::ForwardSink;
use th_store::RunStore;

use bucket::BucketState;

const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);
const DEFAULT_MAX_STEP_SPANS: usize = 10;

struct Inner {
    store: Arc<RunStore>,
    client: Arc<dyn OtlpHttpSender>,
    endpoint: String,
    debounce: Duration,
    max_step_spans: usize,
    attr_caps: AttrCaps,
    buckets: Mutex<HashMap<String, Arc<BucketState>>>,
    run_to_key: Mutex<HashMap<Uuid, String>>,
}

/// Buffers runs by trace group and forwards reconstructed traces downstream
/// once each group goes quiet. Cheap to clone — internally an `Arc`.
#[derive(Clone)]
pub struct ForwardGrouper {
    inner: Arc<Inner>,
}

impl ForwardGrouper {
    pub fn new(store: Arc<RunStore>, client: Arc<dyn OtlpHttpSender>, endpoint: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                endpoint,
                debounce: DEFAULT_DEBOUNCE,
                max_step_spans: DEFAULT_MAX_STEP_SPANS,
                attr_caps: AttrCaps::default(),
                buckets: Mutex::new(HashMap::new()),
                run_to_key: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        Arc::get_mut(&mut self.inner)
            .map(|inner| inner.debounce = debounce)
            .unwrap_or_else(|| {
                // Already shared; rebuild rather than mutate through a reference.
                self.inner = Arc::new(Inner {
                    store: self.inner.store.clone(),
                    client: self.inner.client.clone(),
                    endpoint: self.inner.endpoint.clone(),
                    debounce,
                    max_step_spans: self.inner.max_step_spans,
                    attr_caps: self.inner.attr_caps,
                    buckets: Mutex::new(HashMap::new()),
                    run_to_key: Mutex::new(HashMap::new()),
                });
            });
        self
    }

    pub fn with_max_step_spans(mut self, max_step_spans: usize) -> Self {
        Arc::get_mut(&mut self.inner)
            .map(|inner| inner.max_step_spans = max_step_spans)
            .unwrap_or_else(|| {
                self.inner = Arc::new(Inner {
                    store: self.inner.store.clone(),
                    client: self.inner.client.clone(),
                    endpoint: self.inner.endpoint.clone(),
                    debounce: self.inner.debounce,
                    max_step_spans,
                    attr_caps: self.inner.attr_caps,
                    buckets: Mutex::new(HashMap::new()),
                    run_to_key: Mutex::new(HashMap::new()),
                });
            });
        self
    }

    pub fn with_attr_caps(mut self, attr_caps: AttrCaps) -> Self {
        Arc::get_mut(&mut self.inner)
            .map(|inner| inner.attr_caps = attr_caps)
            .unwrap_or_else(|| {
                self.inner = Arc::new(Inner {
                    store: self.inner.store.clone(),
                    client: self.inner.client.clone(),
                    endpoint: self.inner.endpoint.clone(),
                    debounce: self.inner.debounce,
                    max_step_spans: self.inner.max_step_spans,
                    attr_caps,
                    buckets: Mutex::new(HashMap::new()),
                    run_to_key: Mutex::new(HashMap::new()),
                });
            });
        self
    }

    fn get_or_create_bucket(&self, key: &str) -> Arc<BucketState> {
        self.inner
            .buckets
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(BucketState::new(key.to_string())))
            .clone()
    }

    /// Moves a bucket's contents into the bucket for `new_key`, per §4.6.1's
    /// merge rule, when a later arrival reveals the two belong together.
    fn merge_into(&self, old_key: &str, new_key: &str) -> Arc<BucketState> {
        let new_bucket = self.get_or_create_bucket(new_key);
        let old_bucket = self.inner.buckets.lock().remove(old_key);
        if let Some(old_bucket) = old_bucket {
            if !Arc::ptr_eq(&old_bucket, &new_bucket) {
                old_bucket.generation.fetch_add(1, Ordering::SeqCst);
                let moved: Vec<(Uuid, Run)> = old_bucket.runs.lock().drain().collect();
                if !moved.is_empty() {
                    let mut run_to_key = self.inner.run_to_key.lock();
                    let mut new_runs = new_bucket.runs.lock();
                    for (id, run) in moved {
                        run_to_key.insert(id, new_key.to_string());
                        new_runs.insert(id, run);
                    }
                }
                old_bucket.mark_done();
                tracing::debug!(old_key, new_key, "merged forward-group bucket into parent");
            }
        }
        new_bucket
    }

    fn schedule_flush(&self, bucket: Arc<BucketState>, key: String) {
        let generation = bucket.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        let debounce = self.inner.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if bucket.generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a newer arrival or a merge-away
            }
            let taken = {
                let mut buckets = this.inner.buckets.lock();
                match buckets.get(&key) {
                    Some(current) if Arc::ptr_eq(current, &bucket) => buckets.remove(&key),
                    _ => None,
                }
            };
            if let Some(bucket) = taken {
                bucket.mark_done();
                this.flush(bucket).await;
            }
        });
    }

    fn candidate_root(&self, key: &str, buffered: &HashMap<Uuid, Run>) -> Option<Uuid> {
        if let Ok(id) = Uuid::parse_str(key) {
            return Some(id);
        }
        for run in buffered.values() {
            let mut current = run.clone();
            loop {
                match current.parent_run_id {
                    None => return Some(current.id),
                    Some(parent_id) => match self.inner.store.get(parent_id) {
                        Some(parent) => current = parent,
                        None => break,
                    },
                }
            }
        }
        buffered.values().find(|r| r.parent_run_id.is_none()).map(|r| r.id)
    }

    async fn flush(&self, bucket: Arc<BucketState>) {
        let buffered: HashMap<Uuid, Run> = bucket.runs.lock().drain().collect();
        {
            let mut run_to_key = self.inner.run_to_key.lock();
            for id in buffered.keys() {
                run_to_key.remove(id);
            }
        }
        if buffered.is_empty() {
            return;
        }

        let root_id = self.candidate_root(&bucket.key, &buffered);

        let mut all: HashMap<Uuid, Run> = HashMap::new();
        if let Some(root_id) = root_id {
            for run in self.inner.store.hierarchy(root_id) {
                all.insert(run.id, run);
            }
        }
        for (id, run) in buffered {
            all.insert(id, run); // buffered wins on id conflict
        }
        if all.is_empty() {
            return;
        }

        let mut children: HashMap<Option<Uuid>, Vec<Uuid>> = HashMap::new();
        for run in all.values() {
            let parent = run.parent_run_id.filter(|p| all.contains_key(p));
            children.entry(parent).or_default().push(run.id);
        }
        let roots = children.get(&None).cloned().unwrap_or_default();

        for root in roots {
            if let Err(e) = emit::emit_trace(
                self.inner.client.as_ref(),
                &self.inner.endpoint,
                &all,
                &children,
                root,
                self.inner.attr_caps,
                self.inner.max_step_spans,
            )
            .await
            {
                tracing::warn!(error = %e, run_id = %root, "forwarding trace to downstream collector failed");
            }
        }
    }
}

#[async_trait]
impl ForwardSink for ForwardGrouper {
    async fn offer(&self, run: Run) {
        let run_id = run.id;
        let new_key = {
            let run_to_key = self.inner.run_to_key.lock();
            group_key::resolve(&run, &run_to_key)
        };
        let old_key = self.inner.run_to_key.lock().get(&run_id).cloned();

        let bucket = match old_key {
            Some(ref old) if *old != new_key => self.merge_into(old, &new_key),
            _ => self.get_or_create_bucket(&new_key),
        };

        bucket.runs.lock().insert(run_id, run);
        self.inner.run_to_key.lock().insert(run_id, new_key.clone());

        self.schedule_flush(bucket, new_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use th_domain::run::{RunStatus, RunType};

    fn run(id: Uuid, parent: Option<Uuid>, name: &str) -> Run {
        let now = Utc::now();
        Run {
            id,
            name: name.into(),
            run_type: RunType::Chain,
            start_time: Some(now),
            end_time: Some(now),
            parent_run_id: parent,
            status: RunStatus::Completed,
            inputs: HashMap::new(),
            outputs: Some(HashMap::new()),
            extra: HashMap::new(),
            serialized: None,
            events: Vec::new(),
            tags: Vec::new(),
            error: None,
            project_name: Some("proj".into()),
            reference_example_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn grouper() -> (ForwardGrouper, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RunStore::open(dir.path()).unwrap());
        let client: Arc<dyn OtlpHttpSender> = Arc::new(http_client::tests::RecordingSender::new());
        let grouper = ForwardGrouper::new(store, client, "http://collector/v1/traces".into())
            .with_debounce(Duration::from_millis(20));
        (grouper, dir)
    }

    #[test]
    fn config_tunables_apply_on_a_freshly_built_grouper() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RunStore::open(dir.path()).unwrap());
        let client: Arc<dyn OtlpHttpSender> = Arc::new(http_client::tests::RecordingSender::new());
        let grouper = ForwardGrouper::new(store, client, "http://collector/v1/traces".into())
            .with_debounce(Duration::from_secs(7))
            .with_max_step_spans(3)
            .with_attr_caps(AttrCaps {
                top_level_len: 10,
                nested_len: 5,
                list_cap: 2,
            });
        assert_eq!(grouper.inner.debounce, Duration::from_secs(7));
        assert_eq!(grouper.inner.max_step_spans, 3);
        assert_eq!(grouper.inner.attr_caps.top_level_len, 10);
    }

    #[tokio::test]
    async fn flush_fires_after_debounce_and_empties_the_bucket() {
        let (grouper, _dir) = grouper();
        let root_id = Uuid::new_v4();
        grouper.inner.store.insert(run(root_id, None, "root")).unwrap();
        grouper.offer(run(root_id, None, "root")).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(grouper.inner.buckets.lock().is_empty());
    }

    #[tokio::test]
    async fn rapid_arrivals_reset_the_debounce_window() {
        let (grouper, _dir) = grouper();
        let root_id = Uuid::new_v4();
        grouper.inner.store.insert(run(root_id, None, "root")).unwrap();

        grouper.offer(run(root_id, None, "root")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        grouper.offer(run(root_id, None, "root")).await;

        tokio::time::sleep(Duration::from_millis(15)).await;
        // Second arrival reset the timer; bucket should still be live here.
        assert!(!grouper.inner.buckets.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(grouper.inner.buckets.lock().is_empty());
    }

    #[tokio::test]
    async fn child_arriving_before_parent_is_known_keys_on_parent_id() {
        let (grouper, _dir) = grouper();
        let parent_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        grouper.offer(run(child_id, Some(parent_id), "child")).await;

        let key = grouper.inner.run_to_key.lock().get(&child_id).cloned();
        assert_eq!(key, Some(parent_id.to_string()));
    }
}
