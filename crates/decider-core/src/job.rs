//! Job descriptors.
//!
//! A [`JobBuilder`] accumulates the definition of one unit of work. Once the
//! registry assigns it a logical name and a reuse policy it becomes an
//! immutable [`JobDescriptor`].

use crate::cache::{CacheKey, validate_logical_name};
use crate::config::RunConfig;
use crate::ids::JobId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Execution environment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
    Macos,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Windows => write!(f, "windows"),
            Platform::Macos => write!(f, "macos"),
        }
    }
}

/// Reference to another job, resolved when the graph is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRef {
    /// A job whose backend id is already known.
    Resolved(JobId),
    /// A job named by logical key, looked up in the final job set.
    Pending(String),
}

impl JobRef {
    pub fn pending(logical_name: impl Into<String>) -> Self {
        JobRef::Pending(logical_name.into())
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobRef::Resolved(id) => write!(f, "{}", id),
            JobRef::Pending(name) => write!(f, "{}", name),
        }
    }
}

/// One entry of a job script. Steps run sequentially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Shell(String),
    /// Check out the run's source bundle into the working directory.
    CheckoutBundle,
    /// Download an artifact published by another job.
    FetchArtifact { from: JobRef, artifact: String },
}

/// A file the job promises to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub expires_in: Option<Duration>,
}

impl Artifact {
    /// Public name of the artifact, as referenced by downstream jobs.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Whether a job may be deduplicated against identical work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Always submit a fresh job. Such jobs have no cache key.
    AlwaysCreate,
    /// Reuse any job already registered or completed under this key.
    FindOrCreate(CacheKey),
}

impl ReusePolicy {
    pub fn cache_key(&self) -> Option<&CacheKey> {
        match self {
            ReusePolicy::AlwaysCreate => None,
            ReusePolicy::FindOrCreate(key) => Some(key),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReusePolicy::AlwaysCreate => "always-create",
            ReusePolicy::FindOrCreate(_) => "find-or-create",
        }
    }
}

/// Builder for a job definition.
///
/// Run-wide routes, scopes, the index namespace and the decision job
/// dependency are copied from the [`RunConfig`] when the builder is created.
/// Changes to the configuration afterwards do not reach jobs that were already
/// started.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    title: String,
    platform: Platform,
    worker_type: String,
    environment: BTreeMap<String, String>,
    script: Vec<Step>,
    artifacts: Vec<Artifact>,
    artifacts_expire_in: Duration,
    dependencies: Vec<JobRef>,
    scopes: BTreeSet<String>,
    routes: BTreeSet<String>,
    features: BTreeSet<String>,
    caches: BTreeMap<String, String>,
    index_paths: BTreeSet<String>,
    /// `None` when the run must not publish index routes.
    index_prefix: Option<String>,
    max_run_time_minutes: u32,
}

impl JobBuilder {
    pub fn new(config: &RunConfig, platform: Platform, name: &str) -> Self {
        Self {
            title: config.render_title(name),
            platform,
            worker_type: config.worker_type(platform).to_string(),
            environment: BTreeMap::new(),
            script: Vec::new(),
            artifacts: Vec::new(),
            artifacts_expire_in: config.log_artifacts_expire_in(),
            dependencies: config
                .decision_job_id
                .iter()
                .cloned()
                .map(JobRef::Resolved)
                .collect(),
            scopes: config.scopes_for_all_jobs.iter().cloned().collect(),
            routes: config.routes_for_all_jobs.iter().cloned().collect(),
            features: BTreeSet::new(),
            caches: BTreeMap::new(),
            index_paths: BTreeSet::new(),
            index_prefix: (!config.index_read_only).then(|| config.index_prefix.clone()),
            max_run_time_minutes: 30,
        }
    }

    pub fn with_worker_type(mut self, worker_type: impl Into<String>) -> Self {
        self.worker_type = worker_type.into();
        self
    }

    /// Merge environment variables. Later calls win on key collision.
    pub fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Append shell lines. Multi-line input is split and blank lines dropped.
    pub fn with_script(mut self, script: &str) -> Self {
        self.script.extend(
            script
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Step::Shell(line.to_string())),
        );
        self
    }

    pub fn with_repo_bundle(mut self) -> Self {
        self.script.push(Step::CheckoutBundle);
        self
    }

    /// Depend on another job and download one of its artifacts.
    pub fn with_artifact_from(mut self, from: JobRef, artifact: impl Into<String>) -> Self {
        self = self.with_dependency(from.clone());
        self.script.push(Step::FetchArtifact {
            from,
            artifact: artifact.into(),
        });
        self
    }

    pub fn with_dependency(mut self, dependency: JobRef) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn with_artifacts<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expires_in = self.artifacts_expire_in;
        self.artifacts.extend(paths.into_iter().map(|path| Artifact {
            path: path.into(),
            expires_in: Some(expires_in),
        }));
        self
    }

    /// Expiry applied to artifacts declared after this call.
    pub fn with_artifacts_expire_in(mut self, expires_in: Duration) -> Self {
        self.artifacts_expire_in = expires_in;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.extend(routes.into_iter().map(Into::into));
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }

    /// Grant read access to a secret through the backend proxy.
    pub fn with_secret_access(self, path: &str) -> Self {
        self.with_features(["taskclusterProxy"])
            .with_scopes([format!("secrets:get:{}", path)])
    }

    /// Mount persistent worker caches, keyed by cache name.
    pub fn with_caches<K, V>(mut self, caches: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.caches
            .extend(caches.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Publish the job under an additional, human-chosen index path.
    pub fn with_index_at(mut self, path: impl Into<String>) -> Self {
        self.index_paths.insert(path.into());
        self
    }

    pub fn with_max_run_time_minutes(mut self, minutes: u32) -> Self {
        self.max_run_time_minutes = minutes;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn worker_type(&self) -> &str {
        &self.worker_type
    }

    /// Freeze the builder into a descriptor.
    ///
    /// Find-or-create jobs are published under their cache key, and every job
    /// under its extra index paths, unless the run is index-read-only.
    pub fn finish(mut self, logical_name: &str, reuse: ReusePolicy) -> Result<JobDescriptor> {
        validate_logical_name(logical_name)?;
        if self
            .dependencies
            .iter()
            .any(|dep| matches!(dep, JobRef::Pending(name) if name == logical_name))
        {
            return Err(Error::SelfDependency(logical_name.to_string()));
        }

        if let Some(prefix) = &self.index_prefix {
            let keyed = reuse.cache_key().map(|key| key.to_string());
            for path in keyed.iter().chain(self.index_paths.iter()) {
                self.routes.insert(format!("index.{}.{}", prefix, path));
            }
        }

        Ok(JobDescriptor {
            logical_name: logical_name.to_string(),
            title: self.title,
            platform: self.platform,
            worker_type: self.worker_type,
            environment: self.environment,
            script: self.script,
            artifacts: self.artifacts,
            dependencies: self.dependencies,
            scopes: self.scopes,
            routes: self.routes,
            features: self.features,
            caches: self.caches,
            max_run_time_minutes: self.max_run_time_minutes,
            reuse,
        })
    }
}

/// Immutable definition of one job in a decision run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub logical_name: String,
    pub title: String,
    pub platform: Platform,
    pub worker_type: String,
    pub environment: BTreeMap<String, String>,
    pub script: Vec<Step>,
    pub artifacts: Vec<Artifact>,
    pub dependencies: Vec<JobRef>,
    pub scopes: BTreeSet<String>,
    pub routes: BTreeSet<String>,
    pub features: BTreeSet<String>,
    pub caches: BTreeMap<String, String>,
    pub max_run_time_minutes: u32,
    pub reuse: ReusePolicy,
}

impl JobDescriptor {
    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.reuse.cache_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> RunConfig {
        RunConfig::default()
    }

    #[test]
    fn test_env_override_wins() {
        let job = JobBuilder::new(&config(), Platform::Linux, "Build")
            .with_env([("CC", "gcc"), ("RUSTFLAGS", "-Dwarnings")])
            .with_env([("CC", "clang")])
            .finish("build", ReusePolicy::AlwaysCreate)
            .unwrap();

        assert_eq!(job.environment["CC"], "clang");
        assert_eq!(job.environment["RUSTFLAGS"], "-Dwarnings");
    }

    #[test]
    fn test_script_keeps_order_and_drops_blank_lines() {
        let job = JobBuilder::new(&config(), Platform::Linux, "Build")
            .with_repo_bundle()
            .with_script(
                "
                ./mach build --dev

                ./mach test-unit
            ",
            )
            .finish("build", ReusePolicy::AlwaysCreate)
            .unwrap();

        assert_eq!(
            job.script,
            vec![
                Step::CheckoutBundle,
                Step::Shell("./mach build --dev".to_string()),
                Step::Shell("./mach test-unit".to_string()),
            ]
        );
    }

    #[test]
    fn test_artifact_from_adds_single_dependency() {
        let job = JobBuilder::new(&config(), Platform::Linux, "Upload")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.bundle")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.index")
            .finish("docs-upload", ReusePolicy::AlwaysCreate)
            .unwrap();

        assert_eq!(job.dependencies, vec![JobRef::pending("docs-build")]);
        assert_eq!(job.script.len(), 2);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = JobBuilder::new(&config(), Platform::Linux, "Loop")
            .with_dependency(JobRef::pending("loop"))
            .finish("loop", ReusePolicy::AlwaysCreate)
            .unwrap_err();
        assert!(matches!(err, Error::SelfDependency(name) if name == "loop"));
    }

    #[test]
    fn test_run_wide_tags_captured_at_construction() {
        let mut config = config();
        config.scopes_for_all_jobs.push("queue:route:early".to_string());
        let early = JobBuilder::new(&config, Platform::Linux, "Early");

        config.scopes_for_all_jobs.push("queue:route:late".to_string());
        let late = JobBuilder::new(&config, Platform::Linux, "Late");

        let early = early.finish("early", ReusePolicy::AlwaysCreate).unwrap();
        let late = late.finish("late", ReusePolicy::AlwaysCreate).unwrap();

        assert!(early.scopes.contains("queue:route:early"));
        assert!(!early.scopes.contains("queue:route:late"));
        assert!(late.scopes.contains("queue:route:early"));
        assert!(late.scopes.contains("queue:route:late"));
    }

    #[test]
    fn test_secret_access_grants_scope_and_proxy() {
        let job = JobBuilder::new(&config(), Platform::Windows, "Sign")
            .with_secret_access("project/ci/codesign")
            .finish("sign", ReusePolicy::AlwaysCreate)
            .unwrap();
        assert!(job.scopes.contains("secrets:get:project/ci/codesign"));
        assert!(job.features.contains("taskclusterProxy"));
    }

    #[test]
    fn test_index_routes_follow_read_only_flag() {
        let snapshot = crate::cache::SourceSnapshot::new(
            "tree",
            "head",
            crate::ids::BundleHandle::new("public/repo.bundle"),
        );
        let key = crate::cache::CacheKeyResolver::new(&snapshot)
            .resolve("docs-build")
            .unwrap();

        let mut config = config();
        let published = JobBuilder::new(&config, Platform::Linux, "Docs")
            .with_index_at("docs-report")
            .finish("docs-build", ReusePolicy::FindOrCreate(key.clone()))
            .unwrap();
        assert!(published.routes.contains("index.project.ci.docs-build.tree"));
        assert!(published.routes.contains("index.project.ci.docs-report"));

        config.index_read_only = true;
        let read_only = JobBuilder::new(&config, Platform::Linux, "Docs")
            .with_index_at("docs-report")
            .finish("docs-build", ReusePolicy::FindOrCreate(key))
            .unwrap();
        assert!(read_only.routes.iter().all(|r| !r.starts_with("index.")));
    }

    #[test]
    fn test_decision_job_is_a_resolved_dependency() {
        let config = RunConfig {
            decision_job_id: Some(JobId::new("decision")),
            ..Default::default()
        };
        let job = JobBuilder::new(&config, Platform::Macos, "Unit")
            .finish("macos-unit", ReusePolicy::AlwaysCreate)
            .unwrap();
        assert_eq!(job.dependencies, vec![JobRef::Resolved(JobId::new("decision"))]);
    }

    #[test]
    fn test_artifact_name() {
        let artifact = Artifact {
            path: "/repo/target/doc/docs.bundle".to_string(),
            expires_in: None,
        };
        assert_eq!(artifact.name(), "docs.bundle");
    }

    #[test]
    fn test_always_create_has_no_cache_key() {
        let job = JobBuilder::new(&config(), Platform::Linux, "Untrusted")
            .finish("linux-unit-untrusted", ReusePolicy::AlwaysCreate)
            .unwrap();
        assert!(job.cache_key().is_none());
    }
}
