//! Default dispatch table.

use crate::catalog;
use crate::dispatch::{DispatchTable, JobOptions, JobSpec, TriggerSetup};
use decider_core::{Platform, TriggerKind};

/// Route the source host uses to report job status on commits.
pub const STATUSES_ROUTE: &str = "statuses";

/// Route notifying the daily run's failure channel.
pub const DAILY_NOTIFY_ROUTE: &str = "notify.irc-channel.#servo.on-failed";

/// Environment override naming the Windows worker type for image tests.
pub const NEW_AMI_WORKER_TYPE: &str = "NEW_AMI_WORKER_TYPE";

fn all_tests() -> Vec<JobSpec> {
    vec![
        JobSpec::new("linux-unit", catalog::linux_unit),
        JobSpec::new("docs-build", catalog::docs_build),
        JobSpec::new("windows-unit", catalog::windows_unit),
        JobSpec::new("windows-arm64", catalog::windows_arm64),
        JobSpec::new("windows-uwp-x64", catalog::windows_uwp_x64),
        JobSpec::new("macos-unit", catalog::macos_unit),
        JobSpec::new("linux-release", catalog::linux_release),
    ]
}

fn hosted_setup() -> TriggerSetup {
    TriggerSetup {
        routes: vec![STATUSES_ROUTE.to_string()],
        ..Default::default()
    }
}

/// The project's trigger table.
///
/// `master` builds the docs itself so that `docs-upload` always has its
/// producer in the graph; the build is normally reused from the `auto` push
/// that landed the same tree.
pub fn default_table() -> DispatchTable {
    DispatchTable::new()
        .with_setup(TriggerKind::Push, hosted_setup())
        .with_setup(
            TriggerKind::PullRequest,
            TriggerSetup {
                index_read_only: true,
                commit_is_head: true,
                ..hosted_setup()
            },
        )
        .with_setup(
            TriggerKind::Scheduled,
            TriggerSetup {
                scoped_routes: vec![DAILY_NOTIFY_ROUTE.to_string()],
                commit_is_head: true,
                task_name_template: Some("CI daily: {}.".to_string()),
                ping_contacts_on_failure: true,
                ..Default::default()
            },
        )
        .on_push("auto", all_tests())
        .on_push("try", all_tests())
        .on_push("try-taskcluster", vec![])
        .on_push(
            "master",
            vec![
                JobSpec::new("docs-build", catalog::docs_build),
                JobSpec::new("docs-upload", catalog::docs_upload),
                JobSpec::new("regression-report", catalog::regression_report),
            ],
        )
        .on_push("try-mac", vec![JobSpec::new("macos-unit", catalog::macos_unit)])
        .on_push(
            "try-linux",
            vec![
                JobSpec::new("linux-unit", catalog::linux_unit),
                JobSpec::new("docs-build", catalog::docs_build),
                JobSpec::new("linux-release", catalog::linux_release),
            ],
        )
        .on_push(
            "try-windows",
            vec![
                JobSpec::new("windows-unit", catalog::windows_unit),
                JobSpec::new("windows-arm64", catalog::windows_arm64),
                JobSpec::new("windows-uwp-x64", catalog::windows_uwp_x64),
            ],
        )
        .on_push("try-arm", vec![JobSpec::new("windows-arm64", catalog::windows_arm64)])
        .on_push("try-wpt", vec![])
        .on_push("try-wpt-2020", vec![])
        .on_push("try-wpt-mac", vec![])
        .on_push("test-wpt", vec![])
        .derive_push_branch("try-windows-rdp", "try-windows", |options| options.rdp = true)
        .on_pull_request(vec![JobSpec::new(
            "linux-unit-untrusted",
            catalog::linux_unit_untrusted,
        )])
        .on_schedule(vec![
            JobSpec::new("rust-nightly", catalog::rust_nightly),
            JobSpec::new("linux-nightly", catalog::linux_nightly),
            JobSpec::new("windows-nightly", catalog::windows_nightly),
            JobSpec::new("macos-nightly", catalog::macos_nightly),
            JobSpec::new("wpt-update", catalog::wpt_update),
            JobSpec::new("uwp-nightly", catalog::uwp_nightly),
        ])
        .on_request(
            "try-windows-ami",
            TriggerSetup {
                commit_is_head: true,
                worker_type_overrides: vec![(Platform::Windows, NEW_AMI_WORKER_TYPE.to_string())],
                ..Default::default()
            },
            vec![JobSpec::new("windows-unit", catalog::windows_unit).with_options(JobOptions {
                cached: false,
                rdp: true,
            })],
        )
}
