//! Job construction functions.
//!
//! Each function has the [`JobFn`](crate::dispatch::JobFn) signature so the
//! dispatch table can refer to it directly. Trusted build jobs are
//! find-or-create and keyed on the source tree; jobs with side effects
//! (uploads, reports, untrusted builds) are always created.

use crate::decision::DecisionRun;
use crate::dispatch::JobOptions;
use crate::registry::JobHandle;
use decider_core::{JobBuilder, Platform, Result, RunConfig};

const BUILD_ENV: &[(&str, &str)] = &[("RUSTFLAGS", "-Dwarnings"), ("CARGO_INCREMENTAL", "0")];

const NIGHTLY_TOOLCHAIN_ENV: &[(&str, &str)] = &[("CARGO_INCREMENTAL", "0")];

const LINUX_BUILD_ENV: &[(&str, &str)] = &[
    ("RUST_BACKTRACE", "1"),
    ("SHELL", "/bin/dash"),
    ("CCACHE", "sccache"),
    ("RUSTC_WRAPPER", "sccache"),
    ("CC", "clang"),
    ("CXX", "clang++"),
    ("SCCACHE_IDLE_TIMEOUT", "1200"),
    ("SCCACHE_MAX_FRAME_LENGTH", "104857600"),
];

const WINDOWS_BUILD_ENV: &[(&str, &str)] = &[
    ("PYTHON3", "%HOMEDRIVE%%HOMEPATH%\\python3\\python.exe"),
    ("LINKER", "lld-link.exe"),
    ("MOZTOOLS_PATH_PREPEND", "%HOMEDRIVE%%HOMEPATH%\\git\\cmd"),
    ("CC", "clang-cl.exe"),
    ("CXX", "clang-cl.exe"),
];

const WINDOWS_X64_ENV: &[(&str, &str)] = &[(
    "GSTREAMER_1_0_ROOT_X86_64",
    "%HOMEDRIVE%%HOMEPATH%\\gst\\gstreamer\\1.0\\x86_64\\",
)];

const WINDOWS_ARM64_ENV: &[(&str, &str)] = &[("PKG_CONFIG_ALLOW_CROSS", "1")];

const LINUX_CACHES: &[(&str, &str)] = &[
    ("ci-cargo-registry", "/root/.cargo/registry"),
    ("ci-cargo-git", "/root/.cargo/git"),
    ("ci-rustup", "/root/.rustup"),
    ("ci-sccache", "/root/.cache/sccache"),
];

const APPX_ARTIFACT: &str = "repo/support/hololens/AppPackages/ServoApp/FirefoxReality.zip";

const CODESIGN_SECRET: &str = "project/ci/windows-codesign-cert/latest";
const UPLOAD_SECRET: &str = "project/ci/s3-upload-credentials";

// Platform templates

fn linux_build_task(config: &RunConfig, name: &str, base_env: &[(&str, &str)]) -> JobBuilder {
    JobBuilder::new(config, Platform::Linux, name)
        .with_scopes(["docker-worker:cache:ci-*"])
        .with_caches(LINUX_CACHES.iter().copied())
        .with_artifacts_expire_in(config.build_artifacts_expire_in())
        .with_max_run_time_minutes(60)
        .with_env(base_env.iter().copied())
        .with_env(LINUX_BUILD_ENV.iter().copied())
        .with_repo_bundle()
        .with_script("python3 ./mach bootstrap-gstreamer")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WindowsArch {
    X64,
    Arm64,
}

fn windows_build_task(
    config: &RunConfig,
    name: &str,
    arch: WindowsArch,
    options: &JobOptions,
) -> JobBuilder {
    let arch_env = match arch {
        WindowsArch::X64 => WINDOWS_X64_ENV,
        WindowsArch::Arm64 => WINDOWS_ARM64_ENV,
    };
    let task = JobBuilder::new(config, Platform::Windows, name)
        .with_max_run_time_minutes(90)
        .with_artifacts_expire_in(config.build_artifacts_expire_in())
        .with_env(BUILD_ENV.iter().copied())
        .with_env(arch_env.iter().copied())
        .with_env(WINDOWS_BUILD_ENV.iter().copied())
        .with_repo_bundle();
    with_rdp(task, config, options)
}

fn macos_build_task(config: &RunConfig, name: &str) -> JobBuilder {
    JobBuilder::new(config, Platform::Macos, name)
        .with_max_run_time_minutes(2 * 60)
        .with_artifacts_expire_in(config.build_artifacts_expire_in())
        .with_env(BUILD_ENV.iter().copied())
        .with_repo_bundle()
        .with_script(
            "
            time brew bundle install --verbose --no-upgrade --file=etc/ci/macos/Brewfile
            time brew bundle install --verbose --no-upgrade --file=etc/ci/macos/Brewfile-build
            export OPENSSL_INCLUDE_DIR=\"$(brew --prefix openssl)/include\"
            export OPENSSL_LIB_DIR=\"$(brew --prefix openssl)/lib\"
            ",
        )
}

/// Grant remote desktop access to the worker when requested.
fn with_rdp(task: JobBuilder, config: &RunConfig, options: &JobOptions) -> JobBuilder {
    if !options.rdp {
        return task;
    }
    let scope = format!(
        "generic-worker:allow-rdp:{}/{}",
        config.provisioner_id,
        task.worker_type()
    );
    task.with_features(["rdpInfo"]).with_scopes([scope])
}

// Linux

pub fn linux_unit(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("linux-unit", |config| {
        linux_build_task(config, "Tidy + dev build + unit tests", BUILD_ENV)
            .with_max_run_time_minutes(75)
            .with_script(
                "
                python3 ./mach test-tidy --no-progress --all
                python3 ./mach build --dev
                python3 ./mach test-unit
                python3 ./mach package --dev
                python3 ./mach build --dev --libsimpleservo
                python3 ./mach test-tidy --no-progress --self-test
                ./etc/ci/lockfile_changed.sh
                ./etc/ci/check_no_panic.sh
                ",
            )
    })
}

/// Same work as [`linux_unit`] for code that is not trusted yet. Never shares
/// a cache key with the trusted job, and runs on its own worker pool.
pub fn linux_unit_untrusted(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    let job = run
        .job(Platform::Linux, "Tidy + dev build + unit tests")
        .with_worker_type("docker-untrusted")
        .with_max_run_time_minutes(60)
        .with_env(BUILD_ENV.iter().copied())
        .with_env(LINUX_BUILD_ENV.iter().copied())
        .with_repo_bundle()
        .with_script(
            "
            python3 ./mach test-tidy --no-progress --all
            python3 ./mach test-tidy --no-progress --self-test
            python3 ./mach bootstrap-gstreamer
            python3 ./mach build --dev
            python3 ./mach test-unit
            ./etc/ci/lockfile_changed.sh
            ./etc/ci/check_no_panic.sh
            ",
        );
    run.create("linux-unit-untrusted", job)
}

pub fn docs_build(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("docs-build", |config| {
        linux_build_task(config, "Docs + check", BUILD_ENV)
            .with_script(
                "
                RUSTDOCFLAGS=\"--disable-minification\" python3 ./mach doc
                (cd target/doc && git init && git add . && git commit -q -m \"Rebuild documentation\" && git bundle create docs.bundle HEAD)
                python3 ./mach check
                ",
            )
            .with_artifacts(["/repo/target/doc/docs.bundle"])
    })
}

/// Publishes the docs built by `docs-build`, which must be part of the run.
pub fn docs_upload(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    let docs = run.reference("docs-build");
    let job = run
        .job(Platform::Linux, "Upload docs to GitHub Pages")
        .with_artifact_from(docs, "docs.bundle")
        .with_secret_access("project/ci/doc.servo.org")
        .with_script(
            "
            git init --bare
            git config credential.helper store
            git fetch --quiet docs.bundle
            git push --force https://github.com/servo/doc.servo.org FETCH_HEAD:gh-pages
            ",
        );
    run.create("docs-upload", job)
}

pub fn regression_report(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    let script = format!(
        "python3 tests/wpt/reftests-report/gen.py {} {}",
        run.source().tree_hash()?,
        run.commit()?
    );
    let expire_in = run.config().log_artifacts_expire_in();
    let job = run
        .job(Platform::Linux, "Layout 2020 regressions report")
        .with_repo_bundle()
        .with_script(&script)
        .with_artifacts_expire_in(expire_in)
        .with_artifacts(["/repo/tests/wpt/reftests-report/report.html"])
        .with_index_at("layout-2020-regressions-report");
    run.create("regression-report", job)
}

pub fn linux_release(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("linux-release", |config| {
        linux_build_task(config, "Release build", BUILD_ENV).with_script(
            "
            python3 ./mach build --release
            python3 ./mach package --release
            ",
        )
    })
}

pub fn linux_release_assertions(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("linux-release-assertions", |config| {
        linux_build_task(config, "Release build, with debug assertions", BUILD_ENV)
            .with_script(
                "
                time python3 ./mach fetch
                python3 ./mach build --release --with-debug-assertions -p servo
                ./etc/ci/lockfile_changed.sh
                tar -czf /target.tar.gz target/release/servo resources
                sccache --show-stats
                ",
            )
            .with_artifacts(["/target.tar.gz"])
    })
}

pub fn linux_nightly(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("linux-nightly", |config| {
        linux_build_task(config, "Nightly build and upload", BUILD_ENV)
            .with_secret_access(UPLOAD_SECRET)
            .with_script(
                "
                python3 ./mach build --release
                python3 ./mach package --release
                python3 ./mach upload-nightly linux --secret-from-taskcluster
                ",
            )
            .with_artifacts(["/repo/target/release/servo-tech-demo.tar.gz"])
    })
}

/// Dev build with a nightly toolchain. Warnings are not errors here.
pub fn rust_nightly(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    let job = linux_build_task(run.config(), "with Rust Nightly", NIGHTLY_TOOLCHAIN_ENV)
        .with_script(
            "
            echo \"nightly\" > rust-toolchain
            python3 ./mach build --dev
            python3 ./mach test-unit
            ",
        );
    run.create("rust-nightly", job)
}

/// Updates web-platform-tests expectations from a release build with
/// assertions, built in this run or reused from an earlier one.
pub fn wpt_update(run: &mut DecisionRun, options: &JobOptions) -> Result<JobHandle> {
    let build = linux_release_assertions(run, options)?;
    let expire_in = run.config().log_artifacts_expire_in();
    let job = run
        .job(Platform::Linux, "WPT update")
        .with_secret_access("project/ci/wpt-sync")
        .with_artifacts_expire_in(expire_in)
        .with_max_run_time_minutes(8 * 60)
        .with_repo_bundle()
        .with_artifact_from(build.reference(), "target.tar.gz")
        .with_script(
            "
            tar -xzf target.tar.gz
            ./etc/ci/update-wpt-checkout fetch-and-update-expectations | cat
            ./etc/ci/update-wpt-checkout open-pr
            ./etc/ci/update-wpt-checkout cleanup
            ",
        );
    run.create("wpt-update", job)
}

// macOS

pub fn macos_unit(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("macos-unit", |config| {
        macos_build_task(config, "Dev build + unit tests").with_script(
            "
            python3 ./mach build --dev --verbose
            python3 ./mach test-unit
            python3 ./mach package --dev
            ./etc/ci/macos_package_smoketest.sh target/debug/servo-tech-demo.dmg
            ./etc/ci/lockfile_changed.sh
            ",
        )
    })
}

pub fn macos_nightly(run: &mut DecisionRun, _: &JobOptions) -> Result<JobHandle> {
    run.find_or_create("macos-nightly", |config| {
        macos_build_task(config, "Nightly build and upload")
            .with_secret_access(UPLOAD_SECRET)
            .with_secret_access("project/ci/github-homebrew-token")
            .with_script(
                "
                python3 ./mach build --release
                python3 ./mach package --release
                ./etc/ci/macos_package_smoketest.sh target/release/servo-tech-demo.dmg
                python3 ./mach upload-nightly mac --secret-from-taskcluster
                ",
            )
            .with_artifacts(["repo/target/release/servo-tech-demo.dmg"])
    })
}

// Windows

/// Dev build and unit tests. With `cached: false` a fresh job is created
/// even when an identical one exists, e.g. to validate a new worker image.
pub fn windows_unit(run: &mut DecisionRun, options: &JobOptions) -> Result<JobHandle> {
    let options = *options;
    let build = move |config: &RunConfig| {
        windows_build_task(config, "Dev build + unit tests", WindowsArch::X64, &options)
            .with_script(
                "
                python mach fetch
                python mach build --dev
                python mach test-unit
                python mach package --dev
                python mach build --dev --libsimpleservo
                ",
            )
            .with_artifacts(["repo/target/debug/msi/Servo.exe", "repo/target/debug/msi/Servo.zip"])
    };
    if options.cached {
        run.find_or_create("windows-unit", build)
    } else {
        let job = build(run.config());
        run.create("windows-unit", job)
    }
}

pub fn windows_arm64(run: &mut DecisionRun, options: &JobOptions) -> Result<JobHandle> {
    let options = *options;
    run.find_or_create("windows-arm64", move |config| {
        windows_build_task(config, "UWP dev build", WindowsArch::Arm64, &options)
            .with_secret_access(CODESIGN_SECRET)
            .with_script(
                "
                python mach build --dev --target=aarch64-uwp-windows-msvc
                python mach package --dev --target aarch64-uwp-windows-msvc --uwp=arm64
                ",
            )
            .with_artifacts([APPX_ARTIFACT])
    })
}

pub fn windows_uwp_x64(run: &mut DecisionRun, options: &JobOptions) -> Result<JobHandle> {
    let options = *options;
    run.find_or_create("windows-uwp-x64", move |config| {
        windows_build_task(config, "UWP dev build", WindowsArch::X64, &options)
            .with_secret_access(CODESIGN_SECRET)
            .with_script(
                "
                python mach build --dev --target=x86_64-uwp-windows-msvc
                python mach package --dev --target=x86_64-uwp-windows-msvc --uwp=x64
                python mach test-tidy --force-cpp --no-wpt
                ",
            )
            .with_artifacts([APPX_ARTIFACT])
    })
}

pub fn windows_nightly(run: &mut DecisionRun, options: &JobOptions) -> Result<JobHandle> {
    let options = *options;
    run.find_or_create("windows-nightly", move |config| {
        windows_build_task(config, "Nightly build and upload", WindowsArch::X64, &options)
            .with_secret_access(UPLOAD_SECRET)
            .with_script(
                "
                python mach fetch
                python mach build --release
                python mach package --release
                python mach upload-nightly windows-msvc --secret-from-taskcluster
                ",
            )
            .with_artifacts([
                "repo/target/release/msi/Servo.exe",
                "repo/target/release/msi/Servo.zip",
            ])
    })
}

pub fn uwp_nightly(run: &mut DecisionRun, options: &JobOptions) -> Result<JobHandle> {
    let options = *options;
    run.find_or_create("uwp-nightly", move |config| {
        windows_build_task(config, "Nightly UWP build and upload", WindowsArch::X64, &options)
            .with_secret_access(UPLOAD_SECRET)
            .with_secret_access(CODESIGN_SECRET)
            .with_max_run_time_minutes(3 * 60)
            .with_script(
                "
                python mach build --release --target=x86_64-uwp-windows-msvc
                python mach build --release --target=aarch64-uwp-windows-msvc
                python mach package --release --target=x86_64-uwp-windows-msvc --uwp=x64 --uwp=arm64
                python mach upload-nightly uwp --secret-from-taskcluster
                ",
            )
            .with_artifacts([APPX_ARTIFACT])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use decider_core::{BundleHandle, SourceSnapshot, Step};

    fn run(config: RunConfig) -> DecisionRun {
        DecisionRun::new(
            config,
            SourceSnapshot::new("4b825dc6", "c0ffee", BundleHandle::new("public/repo.bundle")),
        )
    }

    #[test]
    fn test_untrusted_variant_has_no_cache_key() {
        let mut run = run(RunConfig::default());
        linux_unit(&mut run, &JobOptions::default()).unwrap();
        linux_unit_untrusted(&mut run, &JobOptions::default()).unwrap();

        let trusted = run.registry().get("linux-unit").unwrap();
        let untrusted = run.registry().get("linux-unit-untrusted").unwrap();
        assert_eq!(
            trusted.cache_key().map(ToString::to_string).as_deref(),
            Some("linux-unit.4b825dc6")
        );
        assert_eq!(untrusted.cache_key(), None);
        assert_eq!(untrusted.descriptor().worker_type, "docker-untrusted");
    }

    #[test]
    fn test_environment_layers() {
        let mut run = run(RunConfig::default());
        linux_unit(&mut run, &JobOptions::default()).unwrap();
        rust_nightly(&mut run, &JobOptions::default()).unwrap();

        let unit = &run.registry().get("linux-unit").unwrap().descriptor().environment;
        assert_eq!(unit["RUSTFLAGS"], "-Dwarnings");
        assert_eq!(unit["CC"], "clang");

        let nightly = &run.registry().get("rust-nightly").unwrap().descriptor().environment;
        assert!(!nightly.contains_key("RUSTFLAGS"));
        assert_eq!(nightly["CARGO_INCREMENTAL"], "0");
    }

    #[test]
    fn test_rdp_adds_scope_for_worker_type() {
        let mut run = run(RunConfig::default());
        let options = JobOptions {
            rdp: true,
            ..Default::default()
        };
        windows_unit(&mut run, &options).unwrap();

        let job = run.registry().get("windows-unit").unwrap().descriptor();
        assert!(job.features.contains("rdpInfo"));
        assert!(job.scopes.contains("generic-worker:allow-rdp:proj-ci/win2016"));
        assert!(job.cache_key().is_some());
    }

    #[test]
    fn test_uncached_windows_unit_is_always_created() {
        let mut run = run(RunConfig::default());
        let options = JobOptions {
            cached: false,
            ..Default::default()
        };
        windows_unit(&mut run, &options).unwrap();

        let job = run.registry().get("windows-unit").unwrap();
        assert!(job.cache_key().is_none());
        assert!(!job.descriptor().features.contains("rdpInfo"));
    }

    #[test]
    fn test_wpt_update_builds_its_dependency() {
        let mut run = run(RunConfig::default());
        wpt_update(&mut run, &JobOptions::default()).unwrap();

        assert!(run.registry().get("linux-release-assertions").is_some());
        let update = run.registry().get("wpt-update").unwrap().descriptor();
        assert!(update
            .dependencies
            .contains(&run.reference("linux-release-assertions")));
        assert!(update.scopes.contains("secrets:get:project/ci/wpt-sync"));
    }

    #[test]
    fn test_wpt_update_runs_inside_checkout() {
        let mut run = run(RunConfig::default());
        wpt_update(&mut run, &JobOptions::default()).unwrap();

        let script = &run.registry().get("wpt-update").unwrap().descriptor().script;
        assert_eq!(script[0], Step::CheckoutBundle);
        assert!(matches!(
            &script[1],
            Step::FetchArtifact { artifact, .. } if artifact == "target.tar.gz"
        ));
        assert_eq!(script[2], Step::Shell("tar -xzf target.tar.gz".to_string()));
    }

    #[test]
    fn test_docs_bundling_does_not_leave_checkout() {
        let mut run = run(RunConfig::default());
        docs_build(&mut run, &JobOptions::default()).unwrap();

        let script = &run.registry().get("docs-build").unwrap().descriptor().script;
        let bundling = script
            .iter()
            .position(|step| {
                matches!(step, Step::Shell(line) if line.contains("git bundle create docs.bundle"))
            })
            .unwrap();
        assert!(matches!(
            &script[bundling],
            Step::Shell(line) if line.starts_with("(cd target/doc") && line.ends_with(')')
        ));
        assert_eq!(script[bundling + 1], Step::Shell("python3 ./mach check".to_string()));
    }

    #[test]
    fn test_regression_report_needs_tree_hash() {
        let mut run = DecisionRun::new(
            RunConfig::default(),
            SourceSnapshot::new("", "c0ffee", BundleHandle::new("public/repo.bundle")),
        );
        assert!(regression_report(&mut run, &JobOptions::default()).is_err());
    }
}
