//! Decision runs.

use crate::dispatch::{DispatchTable, Dispatcher};
use crate::emit::{EmissionPlan, EmitReport, GraphEmitter};
use crate::registry::{JobHandle, JobRegistry};
use decider_core::ports::{ExecutionBackend, SourceState};
use decider_core::{
    CacheKey, CacheKeyResolver, JobBuilder, JobRef, Platform, Result, RunConfig, SourceSnapshot,
    Trigger,
};
use tracing::info;

/// State of one evaluation of a trigger into a job graph.
///
/// Owns the run configuration, the source snapshot and the job registry.
/// Construction functions receive it as `&mut DecisionRun`.
#[derive(Debug)]
pub struct DecisionRun {
    config: RunConfig,
    source: SourceSnapshot,
    registry: JobRegistry,
}

impl DecisionRun {
    pub fn new(config: RunConfig, source: SourceSnapshot) -> Self {
        Self {
            config,
            source,
            registry: JobRegistry::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run-wide settings changed here reach only jobs built afterwards.
    pub fn config_mut(&mut self) -> &mut RunConfig {
        &mut self.config
    }

    pub fn source(&self) -> &SourceSnapshot {
        &self.source
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start a job with the run-wide settings as they are now.
    pub fn job(&self, platform: Platform, name: &str) -> JobBuilder {
        JobBuilder::new(&self.config, platform, name)
    }

    pub fn cache_key(&self, logical_name: &str) -> Result<CacheKey> {
        CacheKeyResolver::new(&self.source).resolve(logical_name)
    }

    /// Commit the run builds: the trigger's commit, or HEAD when unknown.
    pub fn commit(&self) -> Result<&str> {
        match &self.config.git_sha {
            Some(sha) => Ok(sha.as_str()),
            None => self.source.head_commit(),
        }
    }

    /// Register a deduplicated job under the cache key of `logical_name`.
    ///
    /// `build` is not called when the job already exists in this run.
    pub fn find_or_create<F>(&mut self, logical_name: &str, build: F) -> Result<JobHandle>
    where
        F: FnOnce(&RunConfig) -> JobBuilder,
    {
        let cache_key = self.cache_key(logical_name)?;
        let config = &self.config;
        self.registry.find_or_create(cache_key, || build(config))
    }

    pub fn create(&mut self, logical_name: &str, builder: JobBuilder) -> Result<JobHandle> {
        self.registry.create(logical_name, builder)
    }

    /// Deferred reference to a job that may not be constructed yet.
    pub fn reference(&self, logical_name: &str) -> JobRef {
        JobRef::pending(logical_name)
    }

    pub async fn reconcile(&mut self, backend: &dyn ExecutionBackend) -> Result<usize> {
        self.registry.reconcile(backend).await
    }

    pub fn plan(&self) -> Result<EmissionPlan> {
        GraphEmitter::new(&self.config, &self.source).plan(&self.registry)
    }

    pub async fn emit(&self, plan: EmissionPlan, backend: &dyn ExecutionBackend) -> Result<EmitReport> {
        GraphEmitter::new(&self.config, &self.source)
            .emit(plan, backend)
            .await
    }
}

/// Entry point tying dispatch, dedup and emission together.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    dispatcher: Dispatcher,
    config: RunConfig,
}

impl DecisionEngine {
    pub fn new(table: DispatchTable, config: RunConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(table),
            config,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Configure a run for the trigger and construct its jobs.
    ///
    /// Nothing is sent to the backend.
    pub fn prepare_run(&self, trigger: &Trigger, source: SourceSnapshot) -> Result<DecisionRun> {
        let mut config = self.config.clone();
        self.dispatcher.prepare(trigger, &mut config)?;

        let mut run = DecisionRun::new(config, source);
        let handles = self.dispatcher.dispatch(trigger, &mut run)?;
        info!(
            kind = %trigger.kind,
            selected = handles.len(),
            registered = run.registry().len(),
            "constructed jobs"
        );
        Ok(run)
    }

    /// Construct the jobs, look up completed results and plan emission.
    ///
    /// The checkout bundle is only requested from `source` when a job that
    /// will be submitted checks out the repository.
    pub async fn plan(
        &self,
        trigger: &Trigger,
        source: &dyn SourceState,
        backend: &dyn ExecutionBackend,
    ) -> Result<(DecisionRun, EmissionPlan)> {
        let snapshot = SourceSnapshot::capture(source).await;
        let mut run = self.prepare_run(trigger, snapshot)?;
        let reused = run.reconcile(backend).await?;
        if run.registry.needs_checkout() {
            run.source.capture_bundle(source).await;
        }
        let plan = run.plan()?;
        info!(
            jobs = plan.jobs.len(),
            submissions = plan.submissions(),
            reused,
            "planned emission"
        );
        Ok((run, plan))
    }

    /// Evaluate a trigger end to end.
    pub async fn run(
        &self,
        trigger: &Trigger,
        source: &dyn SourceState,
        backend: &dyn ExecutionBackend,
    ) -> Result<EmitReport> {
        let (run, plan) = self.plan(trigger, source, backend).await?;
        run.emit(plan, backend).await
    }
}
