//! Run-scoped job registry and dedup store.
//!
//! The registry is the only mutable state shared by the construction
//! functions of a decision run. It is owned by the run and accessed through
//! `&mut self`, so no locking is involved.

use decider_core::ports::ExecutionBackend;
use decider_core::{
    CacheKey, Error, JobBuilder, JobDescriptor, JobId, JobRef, ReusePolicy, Result, Step,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Handle to a registered job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    logical_name: String,
}

impl JobHandle {
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    /// Deferred reference to this job, for use as a dependency.
    pub fn reference(&self) -> JobRef {
        JobRef::pending(&self.logical_name)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    descriptor: JobDescriptor,
    /// Backend id of an earlier run's job with the same cache key.
    completed: Option<JobId>,
    looked_up: bool,
}

impl RegistryEntry {
    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    pub fn logical_name(&self) -> &str {
        &self.descriptor.logical_name
    }

    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.descriptor.cache_key()
    }

    /// `Some` when the job will be reused instead of submitted.
    pub fn completed(&self) -> Option<&JobId> {
        self.completed.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: Vec<RegistryEntry>,
    by_key: HashMap<CacheKey, usize>,
    by_name: HashMap<String, usize>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the job registered under `cache_key`, building it if needed.
    ///
    /// `builder_fn` runs only when no job with this key exists yet in the run.
    /// The job's logical name is the one the key was derived from.
    pub fn find_or_create<F>(&mut self, cache_key: CacheKey, builder_fn: F) -> Result<JobHandle>
    where
        F: FnOnce() -> JobBuilder,
    {
        if let Some(&index) = self.by_key.get(&cache_key) {
            debug!(%cache_key, "dedup hit");
            return Ok(self.handle(index));
        }

        let logical_name = cache_key.logical_name().to_string();
        let reuse = ReusePolicy::FindOrCreate(cache_key);
        self.check_name_free(&logical_name, reuse.label())?;

        let descriptor = builder_fn().finish(&logical_name, reuse)?;
        Ok(self.insert(descriptor))
    }

    /// Register a job that is never deduplicated.
    pub fn create(&mut self, logical_name: &str, builder: JobBuilder) -> Result<JobHandle> {
        self.check_name_free(logical_name, ReusePolicy::AlwaysCreate.label())?;
        let descriptor = builder.finish(logical_name, ReusePolicy::AlwaysCreate)?;
        Ok(self.insert(descriptor))
    }

    /// Ask the backend for completed results of every find-or-create job not
    /// checked yet. Returns the number of jobs that will be reused.
    ///
    /// A lookup failure aborts with the backend's error.
    pub async fn reconcile(&mut self, backend: &dyn ExecutionBackend) -> Result<usize> {
        let mut reused = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.looked_up) {
            entry.looked_up = true;
            let Some(cache_key) = entry.descriptor.cache_key() else {
                continue;
            };
            if let Some(job_id) = backend.find_completed(cache_key).await? {
                info!(%cache_key, %job_id, "reusing completed job");
                entry.completed = Some(job_id);
                reused += 1;
            }
        }
        Ok(reused)
    }

    pub fn get(&self, logical_name: &str) -> Option<&RegistryEntry> {
        self.by_name.get(logical_name).map(|&index| &self.entries[index])
    }

    pub fn handle_of(&self, logical_name: &str) -> Option<JobHandle> {
        self.by_name.get(logical_name).map(|&index| self.handle(index))
    }

    /// Whether a job still to be submitted checks out the repository.
    pub fn needs_checkout(&self) -> bool {
        self.entries
            .iter()
            .filter(|entry| entry.completed.is_none())
            .flat_map(|entry| entry.descriptor.script.iter())
            .any(|step| matches!(step, Step::CheckoutBundle))
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_name_free(&self, logical_name: &str, requested: &'static str) -> Result<()> {
        let Some(&index) = self.by_name.get(logical_name) else {
            return Ok(());
        };
        let existing = self.entries[index].descriptor.reuse.label();
        if existing == requested {
            Err(Error::DuplicateJob {
                logical_name: logical_name.to_string(),
            })
        } else {
            Err(Error::PolicyConflict {
                logical_name: logical_name.to_string(),
                existing,
                requested,
            })
        }
    }

    fn insert(&mut self, descriptor: JobDescriptor) -> JobHandle {
        let index = self.entries.len();
        debug!(
            logical_name = %descriptor.logical_name,
            policy = descriptor.reuse.label(),
            "registered job"
        );
        if let Some(key) = descriptor.cache_key() {
            self.by_key.insert(key.clone(), index);
        }
        self.by_name.insert(descriptor.logical_name.clone(), index);
        self.entries.push(RegistryEntry {
            descriptor,
            completed: None,
            looked_up: false,
        });
        self.handle(index)
    }

    fn handle(&self, index: usize) -> JobHandle {
        JobHandle {
            logical_name: self.entries[index].descriptor.logical_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decider_core::memory::InMemoryBackend;
    use decider_core::{Platform, RunConfig};
    use std::cell::Cell;

    fn key(name: &str) -> CacheKey {
        CacheKey::try_from(format!("{}.4b825dc6", name)).unwrap()
    }

    fn builder(config: &RunConfig, title: &str) -> JobBuilder {
        JobBuilder::new(config, Platform::Linux, title).with_script("./mach build")
    }

    #[test]
    fn test_find_or_create_invokes_builder_once() {
        let config = RunConfig::default();
        let mut registry = JobRegistry::new();
        let calls = Cell::new(0);

        let first = registry
            .find_or_create(key("docs-build"), || {
                calls.set(calls.get() + 1);
                builder(&config, "Docs")
            })
            .unwrap();
        let second = registry
            .find_or_create(key("docs-build"), || {
                calls.set(calls.get() + 1);
                builder(&config, "Docs again")
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries()[0].descriptor().title, "CI: Docs");
    }

    #[test]
    fn test_create_bypasses_dedup_but_not_name_uniqueness() {
        let config = RunConfig::default();
        let mut registry = JobRegistry::new();

        registry.create("rust-nightly", builder(&config, "Nightly")).unwrap();
        let err = registry
            .create("rust-nightly", builder(&config, "Nightly"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJob { logical_name } if logical_name == "rust-nightly"));
    }

    #[test]
    fn test_policy_conflict_both_directions() {
        let config = RunConfig::default();
        let mut registry = JobRegistry::new();

        registry.create("linux-unit", builder(&config, "Unit")).unwrap();
        let err = registry
            .find_or_create(key("linux-unit"), || builder(&config, "Unit"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PolicyConflict { existing: "always-create", requested: "find-or-create", .. }
        ));

        registry
            .find_or_create(key("docs-build"), || builder(&config, "Docs"))
            .unwrap();
        let err = registry
            .create("docs-build", builder(&config, "Docs"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PolicyConflict { existing: "find-or-create", requested: "always-create", .. }
        ));
    }

    #[tokio::test]
    async fn test_reconcile_marks_completed_jobs() {
        let config = RunConfig::default();
        let backend =
            InMemoryBackend::new().with_completed(key("docs-build"), JobId::new("earlier"));
        let mut registry = JobRegistry::new();

        registry
            .find_or_create(key("docs-build"), || builder(&config, "Docs"))
            .unwrap();
        registry
            .find_or_create(key("linux-unit"), || builder(&config, "Unit"))
            .unwrap();
        registry.create("docs-upload", builder(&config, "Upload")).unwrap();

        assert_eq!(registry.reconcile(&backend).await.unwrap(), 1);
        assert_eq!(
            registry.get("docs-build").unwrap().completed(),
            Some(&JobId::new("earlier"))
        );
        assert_eq!(registry.get("linux-unit").unwrap().completed(), None);

        // Always-create jobs are never looked up, and nothing is looked up twice.
        assert_eq!(backend.lookups().len(), 2);
        registry.reconcile(&backend).await.unwrap();
        assert_eq!(backend.lookups().len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_surfaces_lookup_failure() {
        let config = RunConfig::default();
        let backend = InMemoryBackend::new().failing_lookups();
        let mut registry = JobRegistry::new();
        registry
            .find_or_create(key("docs-build"), || builder(&config, "Docs"))
            .unwrap();

        let err = registry.reconcile(&backend).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
