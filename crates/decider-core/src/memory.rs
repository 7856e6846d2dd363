//! In-memory adapters for the ports.
//!
//! Used for dry runs and tests. The backend treats a submitted job as
//! completed as soon as it is submitted, and publishes it under its cache key
//! when the task carries a matching index route.

use crate::cache::CacheKey;
use crate::ids::{BundleHandle, JobId};
use crate::ports::{ExecutionBackend, SourceState};
use crate::task::TaskDefinition;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct BackendState {
    completed: HashMap<CacheKey, JobId>,
    submitted: Vec<(JobId, TaskDefinition)>,
    artifacts: HashMap<(JobId, String), Vec<u8>>,
    lookups: Vec<CacheKey>,
}

/// Execution backend that keeps everything in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    index_prefix: String,
    fail_lookups: bool,
    fail_submissions: bool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            index_prefix: "project.ci".to_string(),
            fail_lookups: false,
            fail_submissions: false,
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index namespace submissions are published under.
    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }

    /// Pretend a job with this key completed in an earlier run.
    pub fn with_completed(self, cache_key: CacheKey, job_id: JobId) -> Self {
        self.lock().completed.insert(cache_key, job_id);
        self
    }

    pub fn with_artifact(self, job_id: JobId, path: &str, contents: &[u8]) -> Self {
        self.lock()
            .artifacts
            .insert((job_id, path.to_string()), contents.to_vec());
        self
    }

    /// Make every `find_completed` call fail.
    pub fn failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    /// Make every `submit` call fail.
    pub fn failing_submissions(mut self) -> Self {
        self.fail_submissions = true;
        self
    }

    /// Tasks submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<(JobId, TaskDefinition)> {
        self.lock().submitted.clone()
    }

    /// Cache keys looked up so far, in lookup order.
    pub fn lookups(&self) -> Vec<CacheKey> {
        self.lock().lookups.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    async fn submit(&self, task: &TaskDefinition) -> Result<JobId> {
        if self.fail_submissions {
            return Err(Error::Backend(format!(
                "submission of {} rejected",
                task.logical_name
            )));
        }

        let id = JobId::generate();
        let mut state = self.lock();
        if let Some(key) = &task.cache_key {
            let route = format!("index.{}.{}", self.index_prefix, key);
            if task.routes.contains(&route) {
                state.completed.insert(key.clone(), id.clone());
            }
        }
        state.submitted.push((id.clone(), task.clone()));
        Ok(id)
    }

    async fn find_completed(&self, cache_key: &CacheKey) -> Result<Option<JobId>> {
        if self.fail_lookups {
            return Err(Error::Network(format!("index lookup of {} failed", cache_key)));
        }
        let mut state = self.lock();
        state.lookups.push(cache_key.clone());
        Ok(state.completed.get(cache_key).cloned())
    }

    async fn fetch_artifact(&self, job_id: &JobId, path: &str) -> Result<Vec<u8>> {
        self.lock()
            .artifacts
            .get(&(job_id.clone(), path.to_string()))
            .cloned()
            .ok_or_else(|| Error::ArtifactNotFound {
                job_id: job_id.to_string(),
                path: path.to_string(),
            })
    }
}

/// Source state with fixed values.
#[derive(Debug, Clone)]
pub struct StaticSource {
    tree_hash: Option<String>,
    head_commit: String,
    bundle: BundleHandle,
    bundle_requests: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn new(tree_hash: impl Into<String>, head_commit: impl Into<String>) -> Self {
        Self {
            tree_hash: Some(tree_hash.into()),
            head_commit: head_commit.into(),
            bundle: BundleHandle::new("public/repo.bundle"),
            bundle_requests: Arc::default(),
        }
    }

    /// A source whose tree hash cannot be computed.
    pub fn without_tree_hash(head_commit: impl Into<String>) -> Self {
        Self {
            tree_hash: None,
            head_commit: head_commit.into(),
            bundle: BundleHandle::new("public/repo.bundle"),
            bundle_requests: Arc::default(),
        }
    }

    /// How many times a checkout bundle was requested.
    pub fn bundle_requests(&self) -> usize {
        self.bundle_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceState for StaticSource {
    async fn tree_hash(&self) -> Result<String> {
        self.tree_hash
            .clone()
            .ok_or_else(|| Error::SourceState("checkout failed".to_string()))
    }

    async fn head_commit(&self) -> Result<String> {
        Ok(self.head_commit.clone())
    }

    async fn checkout_bundle(&self) -> Result<BundleHandle> {
        self.bundle_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.bundle.clone())
    }
}
