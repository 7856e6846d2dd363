//! Tests for command output.

use crate::config::OutputFormat;
use crate::handlers::{describe, render_plan, render_table};
use decider_core::memory::{InMemoryBackend, StaticSource};
use decider_core::{RunConfig, Trigger};
use decider_engine::DecisionEngine;
use decider_engine::table::default_table;

async fn plan_for(trigger: &Trigger) -> decider_engine::EmissionPlan {
    let engine = DecisionEngine::new(default_table(), RunConfig::default());
    let source = StaticSource::new("4b825dc", "abc123");
    let (_, plan) = engine
        .plan(trigger, &source, &InMemoryBackend::new())
        .await
        .unwrap();
    plan
}

#[tokio::test]
async fn test_plan_table_lists_jobs() {
    let plan = plan_for(&Trigger::push("master", "abc123")).await;
    let text = render_plan(&plan, OutputFormat::Table).unwrap();

    assert!(text.contains("docs-build"));
    assert!(text.contains("after docs-build"));
    assert!(text.contains("3 jobs, 3 to submit"));
}

#[tokio::test]
async fn test_plan_json_tags_actions() {
    let plan = plan_for(&Trigger::push("try-mac", "abc123")).await;
    let text = render_plan(&plan, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(value["jobs"][0]["logical_name"], "macos-unit");
    assert_eq!(value["jobs"][0]["action"], "submit");
}

#[tokio::test]
async fn test_empty_plan() {
    let plan = plan_for(&Trigger::push("feature/login", "abc123")).await;
    let text = render_plan(&plan, OutputFormat::Table).unwrap();
    assert!(text.contains("Nothing to run"));
}

#[test]
fn test_table_lists_derived_branch() {
    let text = render_table(&default_table().rows(), OutputFormat::Table).unwrap();
    let line = text
        .lines()
        .find(|line| line.contains("try-windows-rdp"))
        .unwrap();
    assert!(line.contains("windows-unit[rdp]"));
}

#[test]
fn test_describe_trigger() {
    assert_eq!(describe(&Trigger::push("auto", "abc")), "push to auto");
    assert_eq!(
        describe(&Trigger::ad_hoc("try-windows-ami")),
        "request try-windows-ami"
    );
    assert_eq!(describe(&Trigger::scheduled()), "scheduled");
}
