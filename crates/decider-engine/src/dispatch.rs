//! Event dispatch.
//!
//! The mapping from trigger to job set is plain data: a [`DispatchTable`]
//! that can be enumerated, printed and tested without running anything. The
//! [`Dispatcher`] applies the trigger's run-wide setup and then invokes the
//! selected construction functions in order.

use crate::decision::DecisionRun;
use crate::registry::JobHandle;
use decider_core::{Error, Platform, Result, RunConfig, Trigger, TriggerKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// A job construction function.
pub type JobFn = fn(&mut DecisionRun, &JobOptions) -> Result<JobHandle>;

/// Named parameters bound to a construction function by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobOptions {
    /// Allow remote desktop access to the worker, for debugging.
    pub rdp: bool,
    /// Deduplicate against identical work; `false` always creates a fresh job.
    pub cached: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            rdp: false,
            cached: true,
        }
    }
}

impl fmt::Display for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.rdp {
            flags.push("rdp");
        }
        if !self.cached {
            flags.push("uncached");
        }
        write!(f, "{}", flags.join(","))
    }
}

/// One entry of a job list: a construction function plus its options.
#[derive(Clone)]
pub struct JobSpec {
    pub name: &'static str,
    pub build: JobFn,
    pub options: JobOptions,
}

impl JobSpec {
    pub fn new(name: &'static str, build: JobFn) -> Self {
        Self {
            name,
            build,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Name plus any non-default options, e.g. `windows-unit[rdp]`.
    pub fn label(&self) -> String {
        if self.options == JobOptions::default() {
            self.name.to_string()
        } else {
            format!("{}[{}]", self.name, self.options)
        }
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

/// Run-wide configuration applied before any job is constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerSetup {
    /// Routes added to every job.
    pub routes: Vec<String>,
    /// Routes added to every job together with the `queue:route:` scope that
    /// allows a job to use them.
    pub scoped_routes: Vec<String>,
    /// Scopes added to every job.
    pub scopes: Vec<String>,
    /// Look up previous results but never publish new ones.
    pub index_read_only: bool,
    /// The commit is only known once the repository is checked out.
    pub commit_is_head: bool,
    pub task_name_template: Option<String>,
    /// Append the configured failure contacts to the name template.
    pub ping_contacts_on_failure: bool,
    /// Worker types taken from the trigger's environment overrides, as
    /// `(platform, variable)`.
    pub worker_type_overrides: Vec<(Platform, String)>,
}

impl TriggerSetup {
    pub fn apply(&self, trigger: &Trigger, config: &mut RunConfig) -> Result<()> {
        for route in &self.routes {
            config.add_route_for_all_jobs(route.as_str());
        }
        for route in &self.scoped_routes {
            config.add_route_for_all_jobs(route.as_str());
            config.add_scope_for_all_jobs(format!("queue:route:{}", route));
        }
        for scope in &self.scopes {
            config.add_scope_for_all_jobs(scope.as_str());
        }
        if self.index_read_only {
            config.index_read_only = true;
        }
        if self.commit_is_head {
            config.git_sha = None;
        }
        if let Some(template) = &self.task_name_template {
            config.task_name_template = template.clone();
            if self.ping_contacts_on_failure && !config.daily_failure_contacts.is_empty() {
                config.task_name_template = format!(
                    "{} On failure, ping: {}",
                    template,
                    config.daily_failure_contacts.join(", ")
                );
            }
        }
        for (platform, variable) in &self.worker_type_overrides {
            let worker_type = trigger
                .environment_overrides
                .get(variable)
                .ok_or_else(|| Error::MissingOverride(variable.clone()))?;
            config.set_worker_type(*platform, worker_type.as_str());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct RequestEntry {
    setup: TriggerSetup,
    jobs: Vec<JobSpec>,
}

/// One printable row of a dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub trigger: TriggerKind,
    /// Branch name for pushes, request name for ad-hoc runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub jobs: Vec<String>,
}

/// Trigger to job list mapping. Anything not listed runs nothing.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    setups: BTreeMap<TriggerKind, TriggerSetup>,
    push: BTreeMap<String, Vec<JobSpec>>,
    pull_request: Vec<JobSpec>,
    scheduled: Vec<JobSpec>,
    ad_hoc: BTreeMap<String, RequestEntry>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setup applied to every trigger of this kind.
    pub fn with_setup(mut self, kind: TriggerKind, setup: TriggerSetup) -> Self {
        self.setups.insert(kind, setup);
        self
    }

    pub fn on_push(mut self, branch: &str, jobs: Vec<JobSpec>) -> Self {
        self.push.insert(branch.to_string(), jobs);
        self
    }

    pub fn on_pull_request(mut self, jobs: Vec<JobSpec>) -> Self {
        self.pull_request = jobs;
        self
    }

    pub fn on_schedule(mut self, jobs: Vec<JobSpec>) -> Self {
        self.scheduled = jobs;
        self
    }

    /// Ad-hoc request with its own setup, applied after the kind's setup.
    pub fn on_request(mut self, request: &str, setup: TriggerSetup, jobs: Vec<JobSpec>) -> Self {
        self.ad_hoc
            .insert(request.to_string(), RequestEntry { setup, jobs });
        self
    }

    /// Copy the job list of branch `from` to `branch`, rebinding the options
    /// of every entry with `bind`.
    pub fn derive_push_branch<F>(mut self, branch: &str, from: &str, bind: F) -> Self
    where
        F: Fn(&mut JobOptions),
    {
        let jobs: Vec<JobSpec> = self
            .push
            .get(from)
            .map(|jobs| {
                jobs.iter()
                    .cloned()
                    .map(|mut spec| {
                        bind(&mut spec.options);
                        spec
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.push.insert(branch.to_string(), jobs);
        self
    }

    /// Job list for a trigger, empty when nothing matches.
    pub fn select(&self, trigger: &Trigger) -> &[JobSpec] {
        let jobs = match trigger.kind {
            TriggerKind::Push => trigger
                .branch_name
                .as_deref()
                .and_then(|branch| self.push.get(branch)),
            TriggerKind::PullRequest => Some(&self.pull_request),
            TriggerKind::Scheduled => Some(&self.scheduled),
            TriggerKind::AdHoc => trigger
                .request
                .as_deref()
                .and_then(|request| self.ad_hoc.get(request))
                .map(|entry| &entry.jobs),
        };
        jobs.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Setups that apply to a trigger, in application order.
    pub fn setups(&self, trigger: &Trigger) -> Vec<&TriggerSetup> {
        let request = match trigger.kind {
            TriggerKind::AdHoc => trigger
                .request
                .as_deref()
                .and_then(|request| self.ad_hoc.get(request))
                .map(|entry| &entry.setup),
            _ => None,
        };
        self.setups.get(&trigger.kind).into_iter().chain(request).collect()
    }

    /// Every row of the table, for display.
    pub fn rows(&self) -> Vec<TableRow> {
        let mut rows: Vec<TableRow> = self
            .push
            .iter()
            .map(|(branch, jobs)| TableRow {
                trigger: TriggerKind::Push,
                key: Some(branch.clone()),
                jobs: labels(jobs),
            })
            .collect();
        rows.push(TableRow {
            trigger: TriggerKind::PullRequest,
            key: None,
            jobs: labels(&self.pull_request),
        });
        rows.push(TableRow {
            trigger: TriggerKind::Scheduled,
            key: None,
            jobs: labels(&self.scheduled),
        });
        rows.extend(self.ad_hoc.iter().map(|(request, entry)| TableRow {
            trigger: TriggerKind::AdHoc,
            key: Some(request.clone()),
            jobs: labels(&entry.jobs),
        }));
        rows
    }
}

fn labels(jobs: &[JobSpec]) -> Vec<String> {
    jobs.iter().map(JobSpec::label).collect()
}

/// Applies a [`DispatchTable`] to triggers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: DispatchTable,
}

impl Dispatcher {
    pub fn new(table: DispatchTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Configure the run for a trigger. Must happen before any job is built.
    pub fn prepare(&self, trigger: &Trigger, config: &mut RunConfig) -> Result<()> {
        if !trigger.commit.is_empty() {
            config.git_sha = Some(trigger.commit.clone());
        }
        if let Some(branch) = &trigger.branch_name {
            config.git_ref = Some(format!("refs/heads/{}", branch));
        }
        for setup in self.table.setups(trigger) {
            setup.apply(trigger, config)?;
        }
        Ok(())
    }

    pub fn select(&self, trigger: &Trigger) -> &[JobSpec] {
        let jobs = self.table.select(trigger);
        if jobs.is_empty() {
            warn!(
                kind = %trigger.kind,
                branch = trigger.branch_name.as_deref().unwrap_or(""),
                request = trigger.request.as_deref().unwrap_or(""),
                "no jobs for trigger"
            );
        }
        jobs
    }

    /// Invoke the construction functions selected for a trigger, in order.
    pub fn dispatch(&self, trigger: &Trigger, run: &mut DecisionRun) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::new();
        for spec in self.select(trigger) {
            info!(job = %spec.label(), "constructing job");
            handles.push((spec.build)(run, &spec.options)?);
        }
        Ok(handles)
    }
}
