//! Run-wide configuration.
//!
//! A [`RunConfig`] is owned by one decision run. Trigger setup mutates it
//! before any job is constructed; job builders copy what they need from it at
//! construction time.

use crate::ids::JobId;
use crate::job::Platform;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Template for job titles. `{}` is replaced by the job name.
    #[serde(default = "default_task_name_template")]
    pub task_name_template: String,
    /// Namespace prefix for index routes.
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    #[serde(default = "default_provisioner_id")]
    pub provisioner_id: String,
    #[serde(default = "default_linux_worker_type")]
    pub linux_worker_type: String,
    #[serde(default = "default_windows_worker_type")]
    pub windows_worker_type: String,
    #[serde(default = "default_macos_worker_type")]
    pub macos_worker_type: String,
    /// Routes added to every job constructed after they are set.
    #[serde(default)]
    pub routes_for_all_jobs: Vec<String>,
    /// Scopes added to every job constructed after they are set.
    #[serde(default)]
    pub scopes_for_all_jobs: Vec<String>,
    /// Look up previous results but never publish new index routes.
    #[serde(default)]
    pub index_read_only: bool,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub git_sha: Option<String>,
    /// Backend id of the job running this decision, if any.
    #[serde(default)]
    pub decision_job_id: Option<JobId>,
    /// Root URL of the execution backend, used in artifact download steps.
    #[serde(default = "default_root_url")]
    pub root_url: String,
    #[serde(default = "default_build_artifacts_expire_days")]
    pub build_artifacts_expire_days: u64,
    #[serde(default = "default_dependency_artifacts_expire_days")]
    pub dependency_artifacts_expire_days: u64,
    #[serde(default = "default_log_artifacts_expire_days")]
    pub log_artifacts_expire_days: u64,
    #[serde(default = "default_deadline_hours")]
    pub deadline_hours: u32,
    /// People to ping when a scheduled job fails.
    #[serde(default)]
    pub daily_failure_contacts: Vec<String>,
}

fn default_task_name_template() -> String {
    "CI: {}".to_string()
}

fn default_index_prefix() -> String {
    "project.ci".to_string()
}

fn default_provisioner_id() -> String {
    "proj-ci".to_string()
}

fn default_linux_worker_type() -> String {
    "docker".to_string()
}

fn default_windows_worker_type() -> String {
    "win2016".to_string()
}

fn default_macos_worker_type() -> String {
    "macos".to_string()
}

fn default_root_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_build_artifacts_expire_days() -> u64 {
    7
}

fn default_dependency_artifacts_expire_days() -> u64 {
    30
}

fn default_log_artifacts_expire_days() -> u64 {
    365
}

fn default_deadline_hours() -> u32 {
    24
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task_name_template: default_task_name_template(),
            index_prefix: default_index_prefix(),
            provisioner_id: default_provisioner_id(),
            linux_worker_type: default_linux_worker_type(),
            windows_worker_type: default_windows_worker_type(),
            macos_worker_type: default_macos_worker_type(),
            routes_for_all_jobs: vec![],
            scopes_for_all_jobs: vec![],
            index_read_only: false,
            git_ref: None,
            git_sha: None,
            decision_job_id: None,
            root_url: default_root_url(),
            build_artifacts_expire_days: default_build_artifacts_expire_days(),
            dependency_artifacts_expire_days: default_dependency_artifacts_expire_days(),
            log_artifacts_expire_days: default_log_artifacts_expire_days(),
            deadline_hours: default_deadline_hours(),
            daily_failure_contacts: vec![],
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations that cannot be represented.
    ///
    /// Whether a deadline or expiry fits a timestamp is checked again when a
    /// plan fixes its creation time.
    pub fn validate(&self) -> Result<()> {
        if self.deadline_hours == 0 {
            return Err(Error::Config("deadline_hours must be positive".to_string()));
        }
        for (field, days) in [
            ("build_artifacts_expire_days", self.build_artifacts_expire_days),
            ("dependency_artifacts_expire_days", self.dependency_artifacts_expire_days),
            ("log_artifacts_expire_days", self.log_artifacts_expire_days),
        ] {
            if days.checked_mul(DAY).is_none() {
                return Err(Error::Config(format!("{} is out of range: {}", field, days)));
            }
        }
        Ok(())
    }

    pub fn render_title(&self, name: &str) -> String {
        if self.task_name_template.contains("{}") {
            self.task_name_template.replacen("{}", name, 1)
        } else {
            name.to_string()
        }
    }

    pub fn worker_type(&self, platform: Platform) -> &str {
        match platform {
            Platform::Linux => &self.linux_worker_type,
            Platform::Windows => &self.windows_worker_type,
            Platform::Macos => &self.macos_worker_type,
        }
    }

    pub fn set_worker_type(&mut self, platform: Platform, worker_type: impl Into<String>) {
        let slot = match platform {
            Platform::Linux => &mut self.linux_worker_type,
            Platform::Windows => &mut self.windows_worker_type,
            Platform::Macos => &mut self.macos_worker_type,
        };
        *slot = worker_type.into();
    }

    pub fn add_route_for_all_jobs(&mut self, route: impl Into<String>) {
        let route = route.into();
        if !self.routes_for_all_jobs.contains(&route) {
            self.routes_for_all_jobs.push(route);
        }
    }

    pub fn add_scope_for_all_jobs(&mut self, scope: impl Into<String>) {
        let scope = scope.into();
        if !self.scopes_for_all_jobs.contains(&scope) {
            self.scopes_for_all_jobs.push(scope);
        }
    }

    pub fn build_artifacts_expire_in(&self) -> Duration {
        Duration::from_secs(self.build_artifacts_expire_days.saturating_mul(DAY))
    }

    pub fn dependency_artifacts_expire_in(&self) -> Duration {
        Duration::from_secs(self.dependency_artifacts_expire_days.saturating_mul(DAY))
    }

    pub fn log_artifacts_expire_in(&self) -> Duration {
        Duration::from_secs(self.log_artifacts_expire_days.saturating_mul(DAY))
    }

    /// URL of an artifact published by a job.
    pub fn artifact_url(&self, job_id: &JobId, artifact: &str) -> String {
        format!(
            "{}/api/v1/jobs/{}/artifacts/public/{}",
            self.root_url.trim_end_matches('/'),
            job_id,
            artifact.trim_start_matches('/')
        )
    }
}
