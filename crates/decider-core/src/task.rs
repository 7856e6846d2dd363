//! Task definitions as submitted to the execution backend.
//!
//! A [`TaskDefinition`] is a [`JobDescriptor`](crate::job::JobDescriptor)
//! rendered against the decision run: dependencies are backend ids and every
//! script step is a concrete shell line.

use crate::cache::CacheKey;
use crate::ids::JobId;
use crate::job::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub logical_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<CacheKey>,
    pub provisioner_id: String,
    pub worker_type: String,
    pub platform: Platform,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub dependencies: Vec<JobId>,
    pub scopes: BTreeSet<String>,
    pub routes: BTreeSet<String>,
    pub payload: TaskPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub env: BTreeMap<String, String>,
    pub script: Vec<String>,
    pub artifacts: Vec<TaskArtifact>,
    pub features: BTreeSet<String>,
    pub caches: BTreeMap<String, String>,
    pub max_run_time_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifact {
    /// Public name, e.g. `public/docs.bundle`.
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}
