//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a trigger and submit its job graph
    Run(RunArgs),

    /// Print the dispatch table
    Table,

    /// Download an artifact of a job
    Artifact {
        /// Job id assigned by the backend
        job_id: String,

        /// Artifact path, e.g. public/docs.bundle
        path: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Event kind: github-push, github-pull-request, daily or a request name
    #[arg(long, env = "TASK_FOR")]
    pub task_for: String,

    /// Git ref of the event, e.g. refs/heads/auto
    #[arg(long, env = "GIT_REF")]
    pub git_ref: Option<String>,

    /// Commit of the event
    #[arg(long, env = "GIT_SHA")]
    pub git_sha: Option<String>,

    /// Backend id of the job running this decision
    #[arg(long, env = "TASK_ID")]
    pub decision_job_id: Option<String>,

    /// Run configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Repository to decide for
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Directory the checkout bundle is written to
    #[arg(long, default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    /// Environment override passed to trigger setups (KEY=VALUE)
    #[arg(long = "override", value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,

    /// Plan against an in-memory backend and print the plan
    #[arg(long)]
    pub dry_run: bool,

    /// Output format for the plan or report
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Parse a `KEY=VALUE` override.
pub fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}
