//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the decision core and its
//! external collaborators. Every call may fail; the core never retries.

use crate::cache::CacheKey;
use crate::ids::{BundleHandle, JobId};
use crate::task::TaskDefinition;
use crate::Result;
use async_trait::async_trait;

/// Client for the system that actually runs jobs.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit a job and return the id the backend assigned to it.
    async fn submit(&self, task: &TaskDefinition) -> Result<JobId>;

    /// Look up a previously completed job published under a cache key.
    async fn find_completed(&self, cache_key: &CacheKey) -> Result<Option<JobId>>;

    /// Download an artifact of a job.
    async fn fetch_artifact(&self, job_id: &JobId, path: &str) -> Result<Vec<u8>>;
}

/// Provider of the source state the run is deciding for.
#[async_trait]
pub trait SourceState: Send + Sync {
    /// Hash of the source tree, stable for identical content.
    async fn tree_hash(&self) -> Result<String>;

    /// Commit currently checked out.
    async fn head_commit(&self) -> Result<String>;

    /// Package the checkout so jobs can fetch it.
    async fn checkout_bundle(&self) -> Result<BundleHandle>;
}
