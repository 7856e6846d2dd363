//! Late-bound dependency resolution.
//!
//! Jobs name their upstream jobs with [`JobRef::Pending`] tokens. Nothing is
//! looked up while jobs are being constructed; every token is checked in one
//! pass over the final registry and mapped to a backend id during emission.

use crate::registry::JobRegistry;
use decider_core::{Error, JobId, JobRef, Result};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct DependencyResolver {
    ids: HashMap<String, JobId>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every pending reference of a job that will be submitted
    /// names a job present in the registry.
    ///
    /// Reused jobs are skipped: their dependencies ran in an earlier run.
    pub fn validate(registry: &JobRegistry) -> Result<()> {
        for entry in registry.entries().iter().filter(|e| e.completed().is_none()) {
            for dependency in &entry.descriptor().dependencies {
                let JobRef::Pending(name) = dependency else {
                    continue;
                };
                if registry.get(name).is_none() {
                    return Err(Error::UnresolvedDependency {
                        job: entry.logical_name().to_string(),
                        dependency: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Remember the backend id of a job once it is known.
    pub fn record(&mut self, logical_name: &str, job_id: JobId) {
        debug!(logical_name, %job_id, "resolved job id");
        self.ids.insert(logical_name.to_string(), job_id);
    }

    pub fn resolve(&self, job: &str, reference: &JobRef) -> Result<JobId> {
        match reference {
            JobRef::Resolved(id) => Ok(id.clone()),
            JobRef::Pending(name) => {
                self.ids
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::UnresolvedDependency {
                        job: job.to_string(),
                        dependency: name.clone(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decider_core::{JobBuilder, Platform, RunConfig};

    #[test]
    fn test_validate_reports_dangling_reference() {
        let config = RunConfig::default();
        let mut registry = JobRegistry::new();
        let upload = JobBuilder::new(&config, Platform::Linux, "Upload docs")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.bundle");
        registry.create("docs-upload", upload).unwrap();

        let err = DependencyResolver::validate(&registry).unwrap_err();
        match err {
            Error::UnresolvedDependency { job, dependency } => {
                assert_eq!(job, "docs-upload");
                assert_eq!(dependency, "docs-build");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reference_before_producer_is_registered() {
        let config = RunConfig::default();
        let mut registry = JobRegistry::new();
        let upload = JobBuilder::new(&config, Platform::Linux, "Upload docs")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.bundle");
        registry.create("docs-upload", upload).unwrap();
        registry
            .create("docs-build", JobBuilder::new(&config, Platform::Linux, "Docs"))
            .unwrap();

        assert!(DependencyResolver::validate(&registry).is_ok());
    }

    #[test]
    fn test_resolve() {
        let mut resolver = DependencyResolver::new();
        resolver.record("docs-build", JobId::new("abc"));

        assert_eq!(
            resolver
                .resolve("docs-upload", &JobRef::pending("docs-build"))
                .unwrap(),
            JobId::new("abc")
        );
        assert_eq!(
            resolver
                .resolve("docs-upload", &JobRef::Resolved(JobId::new("decision")))
                .unwrap(),
            JobId::new("decision")
        );
        assert!(resolver
            .resolve("docs-upload", &JobRef::pending("missing"))
            .is_err());
    }
}
