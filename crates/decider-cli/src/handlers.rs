//! Command handlers.

use crate::client::HttpBackend;
use crate::commands::RunArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::source::GitSource;
use console::style;
use decider_core::memory::InMemoryBackend;
use decider_core::{JobId, RunConfig, Trigger, TriggerKind};
use decider_engine::dispatch::TableRow;
use decider_engine::emit::PlannedAction;
use decider_engine::table::default_table;
use decider_engine::{DecisionEngine, EmissionPlan, EmitReport};
use serde::Serialize;
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

type HandlerResult<T = ()> = Result<T, Box<dyn Error>>;

/// Evaluate a trigger and submit, or print, its job graph.
pub async fn run(config: &CliConfig, args: RunArgs) -> HandlerResult {
    let path = args.config.as_deref().or(config.run_config.as_deref());
    let mut run_config = load_run_config(path)?;
    if let Some(id) = args.decision_job_id.filter(|id| !id.is_empty()) {
        run_config.decision_job_id = Some(JobId::new(id));
    }

    let trigger = Trigger::from_task_for(
        &args.task_for,
        args.git_ref.as_deref(),
        args.git_sha.as_deref(),
    )
    .with_overrides(args.overrides);
    let format = args.output.unwrap_or(config.output_format);

    println!(
        "{} Deciding for {}",
        style("▶").cyan(),
        style(describe(&trigger)).bold()
    );

    let engine = DecisionEngine::new(default_table(), run_config.clone());
    let source = GitSource::new(&args.repo, &args.artifacts_dir);

    if args.dry_run {
        let backend = InMemoryBackend::new().with_index_prefix(run_config.index_prefix.clone());
        let (_, plan) = engine.plan(&trigger, &source, &backend).await?;
        println!("{}", render_plan(&plan, format)?);
        return Ok(());
    }

    let backend = HttpBackend::new(
        &config.backend_url,
        config.token.clone(),
        run_config.index_prefix.clone(),
    );
    let report = engine.run(&trigger, &source, &backend).await?;
    info!(
        submitted = report.submitted(),
        reused = report.reused(),
        "decision run finished"
    );
    println!("{}", render_report(&report, format)?);
    Ok(())
}

/// Print the dispatch table.
pub fn table(config: &CliConfig) -> HandlerResult {
    let rows = default_table().rows();
    println!("{}", render_table(&rows, config.output_format)?);
    Ok(())
}

/// Download an artifact of a job.
pub async fn artifact(
    config: &CliConfig,
    job_id: &str,
    path: &str,
    output: Option<PathBuf>,
) -> HandlerResult {
    use decider_core::ports::ExecutionBackend;

    let run_config = load_run_config(config.run_config.as_deref())?;
    let backend = HttpBackend::new(
        &config.backend_url,
        config.token.clone(),
        run_config.index_prefix,
    );
    let bytes = backend.fetch_artifact(&JobId::new(job_id), path).await?;

    match output {
        Some(file) => {
            tokio::fs::write(&file, &bytes).await?;
            eprintln!(
                "{} Wrote {} bytes to {}",
                style("✓").green(),
                bytes.len(),
                file.display()
            );
        }
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

/// Show current configuration.
pub fn show_config(config: &CliConfig) -> HandlerResult {
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

/// Set a configuration value.
pub fn set_config(key: &str, value: &str) -> HandlerResult {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

fn load_run_config(path: Option<&Path>) -> HandlerResult<RunConfig> {
    match path {
        Some(path) => Ok(RunConfig::from_file(path)?),
        None => Ok(RunConfig::default()),
    }
}

pub fn describe(trigger: &Trigger) -> String {
    match trigger.kind {
        TriggerKind::Push => format!(
            "push to {}",
            trigger.branch_name.as_deref().unwrap_or("(no branch)")
        ),
        TriggerKind::AdHoc => format!(
            "request {}",
            trigger.request.as_deref().unwrap_or("(unnamed)")
        ),
        kind => kind.to_string(),
    }
}

fn serialize<T: Serialize>(value: &T, format: OutputFormat) -> HandlerResult<Option<String>> {
    match format {
        OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
        OutputFormat::Table => Ok(None),
    }
}

pub fn render_plan(plan: &EmissionPlan, format: OutputFormat) -> HandlerResult<String> {
    if let Some(text) = serialize(plan, format)? {
        return Ok(text);
    }
    if plan.is_empty() {
        return Ok(format!("{} Nothing to run", style("i").blue()));
    }

    let mut out = format!(
        "Commit {}\n",
        style(plan.commit.as_deref().unwrap_or("HEAD")).dim()
    );
    for job in &plan.jobs {
        let action = match &job.action {
            PlannedAction::Submit { .. } => style("submit".to_string()).green(),
            PlannedAction::Reuse { job_id } => style(format!("reuse {}", job_id)).yellow(),
        };
        out.push_str(&format!("  {:<28} {}", job.logical_name, action));
        if !job.depends_on.is_empty() {
            out.push_str(&format!("  after {}", job.depends_on.join(", ")));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "{} jobs, {} to submit",
        plan.jobs.len(),
        plan.submissions()
    ));
    Ok(out)
}

pub fn render_report(report: &EmitReport, format: OutputFormat) -> HandlerResult<String> {
    if let Some(text) = serialize(report, format)? {
        return Ok(text);
    }
    let mut out = String::new();
    for submission in &report.submissions {
        out.push_str(&format!(
            "  {:<28} {:<10} {}\n",
            submission.logical_name, submission.status, submission.job_id
        ));
    }
    out.push_str(&format!(
        "{} Submitted {}, reused {}",
        style("✓").green(),
        report.submitted(),
        report.reused()
    ));
    Ok(out)
}

pub fn render_table(rows: &[TableRow], format: OutputFormat) -> HandlerResult<String> {
    if let Some(text) = serialize(&rows, format)? {
        return Ok(text);
    }
    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            let trigger = match &row.key {
                Some(key) => format!("{} {}", row.trigger, key),
                None => row.trigger.to_string(),
            };
            let jobs = if row.jobs.is_empty() {
                style("(none)".to_string()).dim().to_string()
            } else {
                row.jobs.join(", ")
            };
            format!("{:<28} {}", trigger, jobs)
        })
        .collect();
    Ok(lines.join("\n"))
}
