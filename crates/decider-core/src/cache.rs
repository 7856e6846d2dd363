//! Content-addressed cache keys.
//!
//! A cache key is derived from the source tree hash and a job's logical name
//! only. Trigger metadata (commit message, pull request number, timestamps)
//! never enters the key, so two triggers at the same tree share one build.

use crate::ids::BundleHandle;
use crate::ports::SourceState;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic key identifying the result of a job for a given source tree.
///
/// Rendered as `{logical_name}.{tree_hash}`, which doubles as the index path
/// the job is published under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CacheKey {
    logical_name: String,
    tree_hash: String,
}

impl CacheKey {
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn tree_hash(&self) -> &str {
        &self.tree_hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.logical_name, self.tree_hash)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for CacheKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let (logical_name, tree_hash) = value
            .rsplit_once('.')
            .ok_or_else(|| Error::Serialization(format!("malformed cache key {:?}", value)))?;
        validate_logical_name(logical_name)?;
        if tree_hash.is_empty() {
            return Err(Error::Serialization(format!("malformed cache key {:?}", value)));
        }
        Ok(Self {
            logical_name: logical_name.to_string(),
            tree_hash: tree_hash.to_string(),
        })
    }
}

/// Check that a logical name is usable as a dedup key and index path segment.
pub fn validate_logical_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidLogicalName(name.to_string()))
    }
}

/// Source state captured once at the start of a decision run.
///
/// Each field keeps the provider's failure instead of aborting immediately:
/// a run that never needs a tree hash (e.g. one that only builds an untrusted
/// one-off job) must not fail because the hash could not be computed.
///
/// The checkout bundle is only created once a run knows it has jobs that
/// check out the repository, see [`SourceSnapshot::capture_bundle`].
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    tree_hash: std::result::Result<String, String>,
    head_commit: std::result::Result<String, String>,
    bundle: Option<std::result::Result<BundleHandle, String>>,
}

impl SourceSnapshot {
    /// Snapshot with every field known.
    pub fn new(
        tree_hash: impl Into<String>,
        head_commit: impl Into<String>,
        bundle: BundleHandle,
    ) -> Self {
        Self {
            tree_hash: non_empty(tree_hash.into(), "tree hash"),
            head_commit: non_empty(head_commit.into(), "head commit"),
            bundle: Some(Ok(bundle)),
        }
    }

    /// Query the provider for the tree hash and head commit.
    pub async fn capture(source: &dyn SourceState) -> Self {
        let tree_hash = match source.tree_hash().await {
            Ok(hash) => non_empty(hash, "tree hash"),
            Err(e) => Err(e.to_string()),
        };
        let head_commit = match source.head_commit().await {
            Ok(sha) => non_empty(sha, "head commit"),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = &tree_hash {
            tracing::warn!(%reason, "tree hash unavailable, cached jobs will fail");
        }

        Self {
            tree_hash,
            head_commit,
            bundle: None,
        }
    }

    /// Ask the provider for a checkout bundle, once.
    pub async fn capture_bundle(&mut self, source: &dyn SourceState) {
        if self.bundle.is_none() {
            self.bundle = Some(source.checkout_bundle().await.map_err(|e| e.to_string()));
        }
    }

    pub fn tree_hash(&self) -> Result<&str> {
        self.tree_hash
            .as_deref()
            .map_err(|reason| Error::SourceState(reason.clone()))
    }

    pub fn head_commit(&self) -> Result<&str> {
        self.head_commit
            .as_deref()
            .map_err(|reason| Error::SourceState(reason.clone()))
    }

    pub fn bundle(&self) -> Result<&BundleHandle> {
        match &self.bundle {
            Some(Ok(bundle)) => Ok(bundle),
            Some(Err(reason)) => Err(Error::SourceState(reason.clone())),
            None => Err(Error::SourceState(
                "checkout bundle was not created".to_string(),
            )),
        }
    }
}

fn non_empty(value: String, what: &str) -> std::result::Result<String, String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        Err(format!("empty {}", what))
    } else {
        Ok(value)
    }
}

/// Computes cache keys for one decision run.
#[derive(Debug, Clone)]
pub struct CacheKeyResolver<'a> {
    source: &'a SourceSnapshot,
}

impl<'a> CacheKeyResolver<'a> {
    pub fn new(source: &'a SourceSnapshot) -> Self {
        Self { source }
    }

    /// Resolve the cache key for a logical job name.
    pub fn resolve(&self, logical_name: &str) -> Result<CacheKey> {
        validate_logical_name(logical_name)?;
        let tree_hash = self.source.tree_hash()?;
        Ok(CacheKey {
            logical_name: logical_name.to_string(),
            tree_hash: tree_hash.to_string(),
        })
    }
}
