//! Graph emission.
//!
//! Emission happens in two phases. [`GraphEmitter::plan`] checks the whole
//! job set, fixes timestamps, artifact expiries and checkout lines, and orders
//! the jobs without touching the backend, so a broken graph never reaches it.
//! [`GraphEmitter::emit`] then submits jobs in that order. The backend assigns
//! ids, so dependency ids and artifact URLs are filled in once upstream jobs
//! have been submitted; nothing else can fail at that point.

use crate::dag::DagBuilder;
use crate::deps::DependencyResolver;
use crate::registry::JobRegistry;
use chrono::{DateTime, TimeDelta, Utc};
use decider_core::ports::ExecutionBackend;
use decider_core::task::{TaskArtifact, TaskDefinition, TaskPayload};
use decider_core::{
    CacheKey, Error, JobDescriptor, JobId, Result, RunConfig, SourceSnapshot, Step,
};
use serde::Serialize;
use std::fmt;
use tracing::info;

const CURL: &str = "curl --retry 5 --connect-timeout 10 -Lf";

/// What emission will do with one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Submit {
        descriptor: Box<JobDescriptor>,
        /// Published artifacts with their expiry already fixed.
        artifacts: Vec<TaskArtifact>,
    },
    Reuse { job_id: JobId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedJob {
    pub logical_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<CacheKey>,
    /// Logical names of the in-run jobs this one waits for.
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub action: PlannedAction,
}

/// Validated job set in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmissionPlan {
    pub commit: Option<String>,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Shell lines that check out `commit`, shared by every job that needs it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checkout: Vec<String>,
    pub jobs: Vec<PlannedJob>,
}

impl EmissionPlan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs that will be submitted.
    pub fn submissions(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| matches!(job.action, PlannedAction::Submit { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    Reused,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Submitted => write!(f, "submitted"),
            SubmissionStatus::Reused => write!(f, "reused"),
        }
    }
}

/// Result of emitting one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub logical_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<CacheKey>,
    pub job_id: JobId,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmitReport {
    pub submissions: Vec<Submission>,
}

impl EmitReport {
    pub fn submitted(&self) -> usize {
        self.count(SubmissionStatus::Submitted)
    }

    pub fn reused(&self) -> usize {
        self.count(SubmissionStatus::Reused)
    }

    pub fn job_id(&self, logical_name: &str) -> Option<&JobId> {
        self.submissions
            .iter()
            .find(|s| s.logical_name == logical_name)
            .map(|s| &s.job_id)
    }

    fn count(&self, status: SubmissionStatus) -> usize {
        self.submissions.iter().filter(|s| s.status == status).count()
    }
}

/// `created + delta`, or a configuration error naming `what`.
fn offset(
    created: DateTime<Utc>,
    delta: Option<TimeDelta>,
    what: &str,
) -> Result<DateTime<Utc>> {
    delta
        .and_then(|delta| created.checked_add_signed(delta))
        .ok_or_else(|| Error::Config(format!("{} is out of range", what)))
}

/// Orders, renders and submits the jobs of one decision run.
pub struct GraphEmitter<'a> {
    config: &'a RunConfig,
    source: &'a SourceSnapshot,
}

impl<'a> GraphEmitter<'a> {
    pub fn new(config: &'a RunConfig, source: &'a SourceSnapshot) -> Self {
        Self { config, source }
    }

    /// Validate the job set and order it for submission.
    ///
    /// Fails on a dangling reference, a dependency cycle, a deadline or
    /// artifact expiry out of range, or a source state that jobs need but
    /// that is unavailable.
    pub fn plan(&self, registry: &JobRegistry) -> Result<EmissionPlan> {
        DependencyResolver::validate(registry)?;

        let created = Utc::now();
        let deadline = offset(
            created,
            TimeDelta::try_hours(i64::from(self.config.deadline_hours)),
            "deadline_hours",
        )?;

        let (commit, checkout) = if registry.needs_checkout() {
            let commit = self.commit()?.to_string();
            let lines = self.checkout_lines(&commit)?;
            (Some(commit), lines)
        } else {
            (None, Vec::new())
        };

        let dag = DagBuilder::new().build(registry)?;
        let mut jobs = Vec::with_capacity(dag.len());
        for node in dag.topological_order()? {
            let entry = &registry.entries()[node.position];
            let action = match entry.completed() {
                Some(job_id) => PlannedAction::Reuse {
                    job_id: job_id.clone(),
                },
                None => PlannedAction::Submit {
                    artifacts: self.artifacts(entry.descriptor(), created)?,
                    descriptor: Box::new(entry.descriptor().clone()),
                },
            };
            jobs.push(PlannedJob {
                logical_name: node.logical_name.clone(),
                cache_key: entry.cache_key().cloned(),
                depends_on: dag
                    .predecessors(&node.logical_name)
                    .iter()
                    .map(|n| n.logical_name.clone())
                    .collect(),
                action,
            });
        }

        Ok(EmissionPlan {
            commit,
            created,
            deadline,
            checkout,
            jobs,
        })
    }

    /// Submit a plan in order. Reused jobs are reported but never submitted.
    ///
    /// The first backend failure aborts emission. Jobs submitted before the
    /// failure stay submitted.
    pub async fn emit(
        &self,
        plan: EmissionPlan,
        backend: &dyn ExecutionBackend,
    ) -> Result<EmitReport> {
        let mut resolver = DependencyResolver::new();
        let mut report = EmitReport::default();

        for job in &plan.jobs {
            let (job_id, status) = match &job.action {
                PlannedAction::Reuse { job_id } => (job_id.clone(), SubmissionStatus::Reused),
                PlannedAction::Submit {
                    descriptor,
                    artifacts,
                } => {
                    let task = self.render(descriptor, artifacts, &resolver, &plan)?;
                    let job_id = backend.submit(&task).await?;
                    info!(logical_name = %job.logical_name, %job_id, "submitted job");
                    (job_id, SubmissionStatus::Submitted)
                }
            };
            resolver.record(&job.logical_name, job_id.clone());
            report.submissions.push(Submission {
                logical_name: job.logical_name.clone(),
                cache_key: job.cache_key.clone(),
                job_id,
                status,
            });
        }

        Ok(report)
    }

    /// Render a planned descriptor into the definition the backend receives.
    ///
    /// Only backend ids are resolved here: every job in `plan` that the
    /// descriptor depends on must already be recorded in `resolver`.
    pub fn render(
        &self,
        descriptor: &JobDescriptor,
        artifacts: &[TaskArtifact],
        resolver: &DependencyResolver,
        plan: &EmissionPlan,
    ) -> Result<TaskDefinition> {
        let job = descriptor.logical_name.as_str();

        let dependencies = descriptor
            .dependencies
            .iter()
            .map(|dependency| resolver.resolve(job, dependency))
            .collect::<Result<Vec<_>>>()?;

        let mut script = Vec::with_capacity(descriptor.script.len());
        for step in &descriptor.script {
            match step {
                Step::Shell(line) => script.push(line.clone()),
                Step::CheckoutBundle => script.extend(plan.checkout.iter().cloned()),
                Step::FetchArtifact { from, artifact } => {
                    let job_id = resolver.resolve(job, from)?;
                    script.push(format!(
                        "{} \"{}\" -o {}",
                        CURL,
                        self.config.artifact_url(&job_id, artifact),
                        artifact
                    ));
                }
            }
        }

        Ok(TaskDefinition {
            name: descriptor.title.clone(),
            logical_name: descriptor.logical_name.clone(),
            cache_key: descriptor.cache_key().cloned(),
            provisioner_id: self.config.provisioner_id.clone(),
            worker_type: descriptor.worker_type.clone(),
            platform: descriptor.platform,
            created: plan.created,
            deadline: plan.deadline,
            dependencies,
            scopes: descriptor.scopes.clone(),
            routes: descriptor.routes.clone(),
            payload: TaskPayload {
                env: descriptor.environment.clone(),
                script,
                artifacts: artifacts.to_vec(),
                features: descriptor.features.clone(),
                caches: descriptor.caches.clone(),
                max_run_time_seconds: u64::from(descriptor.max_run_time_minutes) * 60,
            },
        })
    }

    fn artifacts(
        &self,
        descriptor: &JobDescriptor,
        created: DateTime<Utc>,
    ) -> Result<Vec<TaskArtifact>> {
        descriptor
            .artifacts
            .iter()
            .map(|artifact| {
                let expires = artifact
                    .expires_in
                    .map(|expires_in| {
                        offset(
                            created,
                            TimeDelta::from_std(expires_in).ok(),
                            &format!("expiry of artifact {}", artifact.path),
                        )
                    })
                    .transpose()?;
                Ok(TaskArtifact {
                    name: format!("public/{}", artifact.name()),
                    path: artifact.path.clone(),
                    expires,
                })
            })
            .collect()
    }

    fn commit(&self) -> Result<&str> {
        match &self.config.git_sha {
            Some(sha) => Ok(sha.as_str()),
            None => self.source.head_commit(),
        }
    }

    /// Shell lines that download the run's bundle, check out `commit` and
    /// enter the checkout.
    fn checkout_lines(&self, commit: &str) -> Result<Vec<String>> {
        let bundle = self.source.bundle()?;
        let fetch = match &self.config.decision_job_id {
            Some(decision) => format!(
                "{} \"{}\" -o repo.bundle",
                CURL,
                self.config
                    .artifact_url(decision, bundle.as_str().trim_start_matches("public/"))
            ),
            None => format!("cp \"{}\" repo.bundle", bundle),
        };
        Ok(vec![
            fetch,
            "git init repo".to_string(),
            "git -C repo fetch --quiet ../repo.bundle".to_string(),
            format!("git -C repo reset --hard {}", commit),
            "cd repo".to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decider_core::memory::InMemoryBackend;
    use decider_core::{BundleHandle, JobBuilder, JobRef, Platform};
    use pretty_assertions::assert_eq;

    fn snapshot() -> SourceSnapshot {
        SourceSnapshot::new("4b825dc6", "c0ffee", BundleHandle::new("public/repo.bundle"))
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::try_from(format!("{}.4b825dc6", name)).unwrap()
    }

    #[test]
    fn test_plan_orders_producers_first() {
        let config = RunConfig::default();
        let source = snapshot();
        let mut registry = JobRegistry::new();
        let upload = JobBuilder::new(&config, Platform::Linux, "Upload")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.bundle");
        registry.create("docs-upload", upload).unwrap();
        registry
            .find_or_create(key("docs-build"), || {
                JobBuilder::new(&config, Platform::Linux, "Docs")
                    .with_artifacts(["/repo/target/doc/docs.bundle"])
            })
            .unwrap();

        let plan = GraphEmitter::new(&config, &source).plan(&registry).unwrap();
        let names: Vec<_> = plan.jobs.iter().map(|j| j.logical_name.as_str()).collect();
        assert_eq!(names, vec!["docs-build", "docs-upload"]);
        assert_eq!(plan.jobs[1].depends_on, vec!["docs-build".to_string()]);
        assert_eq!(plan.commit, None);
        assert_eq!(plan.submissions(), 2);
    }

    #[test]
    fn test_plan_serializes_with_action_tag() {
        let config = RunConfig::default();
        let source = snapshot();
        let mut registry = JobRegistry::new();
        registry
            .find_or_create(key("docs-build"), || {
                JobBuilder::new(&config, Platform::Linux, "Docs")
            })
            .unwrap();

        let plan = GraphEmitter::new(&config, &source).plan(&registry).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        let job = &json["jobs"][0];
        assert_eq!(job["logical_name"], "docs-build");
        assert_eq!(job["cache_key"], "docs-build.4b825dc6");
        assert_eq!(job["action"], "submit");
        assert_eq!(job["descriptor"]["title"], "CI: Docs");
    }

    #[test]
    fn test_plan_requires_commit_for_checkout() {
        let config = RunConfig::default();
        let source = SourceSnapshot::new("4b825dc6", "", BundleHandle::new("public/repo.bundle"));
        let mut registry = JobRegistry::new();
        registry
            .create(
                "report",
                JobBuilder::new(&config, Platform::Linux, "Report").with_repo_bundle(),
            )
            .unwrap();

        let err = GraphEmitter::new(&config, &source).plan(&registry).unwrap_err();
        assert!(matches!(err, Error::SourceState(_)));
    }

    #[tokio::test]
    async fn test_emit_renders_fetch_steps_with_upstream_id() {
        let config = RunConfig {
            root_url: "https://ci.example.org".to_string(),
            decision_job_id: Some(JobId::new("decision")),
            ..Default::default()
        };
        let source = snapshot();
        let backend = InMemoryBackend::new();
        let mut registry = JobRegistry::new();
        registry
            .find_or_create(key("docs-build"), || {
                JobBuilder::new(&config, Platform::Linux, "Docs")
                    .with_repo_bundle()
                    .with_script("./mach doc")
                    .with_artifacts(["/repo/target/doc/docs.bundle"])
            })
            .unwrap();
        let upload = JobBuilder::new(&config, Platform::Linux, "Upload")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.bundle");
        registry.create("docs-upload", upload).unwrap();

        let emitter = GraphEmitter::new(&config, &source);
        let plan = emitter.plan(&registry).unwrap();
        assert_eq!(plan.commit.as_deref(), Some("c0ffee"));
        let report = emitter.emit(plan, &backend).await.unwrap();
        assert_eq!(report.submitted(), 2);

        let submitted = backend.submitted();
        let (docs_id, docs) = &submitted[0];
        let (_, upload) = &submitted[1];

        assert_eq!(
            docs.payload.script,
            vec![
                format!(
                    "{} \"https://ci.example.org/api/v1/jobs/decision/artifacts/public/repo.bundle\" -o repo.bundle",
                    CURL
                ),
                "git init repo".to_string(),
                "git -C repo fetch --quiet ../repo.bundle".to_string(),
                "git -C repo reset --hard c0ffee".to_string(),
                "cd repo".to_string(),
                "./mach doc".to_string(),
            ]
        );
        assert_eq!(docs.payload.artifacts[0].name, "public/docs.bundle");
        assert!(docs.routes.contains("index.project.ci.docs-build.4b825dc6"));

        assert_eq!(
            upload.dependencies,
            vec![JobId::new("decision"), docs_id.clone()]
        );
        assert_eq!(
            upload.payload.script,
            vec![format!(
                "{} \"https://ci.example.org/api/v1/jobs/{}/artifacts/public/docs.bundle\" -o docs.bundle",
                CURL, docs_id
            )]
        );
    }

    #[test]
    fn test_plan_rejects_unrepresentable_deadline() {
        let config = RunConfig {
            deadline_hours: u32::MAX,
            ..Default::default()
        };
        let source = snapshot();
        let mut registry = JobRegistry::new();
        registry
            .create("rust-nightly", JobBuilder::new(&config, Platform::Linux, "Nightly"))
            .unwrap();

        let err = GraphEmitter::new(&config, &source).plan(&registry).unwrap_err();
        assert!(
            matches!(&err, Error::Config(msg) if msg.contains("deadline_hours")),
            "got {err:?}"
        );
    }

    #[test]
    fn test_plan_fixes_artifact_expiry() {
        let config = RunConfig::default();
        let source = snapshot();
        let mut registry = JobRegistry::new();
        registry
            .create(
                "report",
                JobBuilder::new(&config, Platform::Linux, "Report")
                    .with_artifacts_expire_in(std::time::Duration::from_secs(3600))
                    .with_artifacts(["/repo/report.html"]),
            )
            .unwrap();
        registry
            .create(
                "forever",
                JobBuilder::new(&config, Platform::Linux, "Forever")
                    .with_artifacts_expire_in(std::time::Duration::from_secs(u64::MAX))
                    .with_artifacts(["/repo/forever.html"]),
            )
            .unwrap();

        let err = GraphEmitter::new(&config, &source).plan(&registry).unwrap_err();
        assert!(
            matches!(&err, Error::Config(msg) if msg.contains("/repo/forever.html")),
            "got {err:?}"
        );

        let mut registry = JobRegistry::new();
        registry
            .create(
                "report",
                JobBuilder::new(&config, Platform::Linux, "Report")
                    .with_artifacts_expire_in(std::time::Duration::from_secs(3600))
                    .with_artifacts(["/repo/report.html"]),
            )
            .unwrap();
        let plan = GraphEmitter::new(&config, &source).plan(&registry).unwrap();
        let PlannedAction::Submit { artifacts, .. } = &plan.jobs[0].action else {
            panic!("expected a submission");
        };
        assert_eq!(artifacts[0].name, "public/report.html");
        assert_eq!(artifacts[0].expires, Some(plan.created + TimeDelta::hours(1)));
        assert_eq!(plan.deadline, plan.created + TimeDelta::hours(24));
    }

    #[tokio::test]
    async fn test_reused_job_is_not_submitted() {
        let config = RunConfig::default();
        let source = snapshot();
        let backend = InMemoryBackend::new().with_completed(key("docs-build"), JobId::new("old"));
        let mut registry = JobRegistry::new();
        registry
            .find_or_create(key("docs-build"), || {
                JobBuilder::new(&config, Platform::Linux, "Docs")
            })
            .unwrap();
        let upload = JobBuilder::new(&config, Platform::Linux, "Upload")
            .with_artifact_from(JobRef::pending("docs-build"), "docs.bundle");
        registry.create("docs-upload", upload).unwrap();
        registry.reconcile(&backend).await.unwrap();

        let emitter = GraphEmitter::new(&config, &source);
        let report = emitter
            .emit(emitter.plan(&registry).unwrap(), &backend)
            .await
            .unwrap();

        assert_eq!(report.reused(), 1);
        assert_eq!(report.submitted(), 1);
        let submitted = backend.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].1.dependencies, vec![JobId::new("old")]);
    }

    #[tokio::test]
    async fn test_submission_failure_is_surfaced() {
        let config = RunConfig::default();
        let source = snapshot();
        let backend = InMemoryBackend::new().failing_submissions();
        let mut registry = JobRegistry::new();
        registry
            .create("rust-nightly", JobBuilder::new(&config, Platform::Linux, "Nightly"))
            .unwrap();

        let emitter = GraphEmitter::new(&config, &source);
        let err = emitter
            .emit(emitter.plan(&registry).unwrap(), &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
