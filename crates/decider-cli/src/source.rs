//! Source state read from a local git checkout.

use async_trait::async_trait;
use decider_core::ports::SourceState;
use decider_core::{BundleHandle, Error, Result};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Artifact name jobs fetch the checkout from.
pub const BUNDLE_ARTIFACT: &str = "public/repo.bundle";

/// [`SourceState`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitSource {
    repo: PathBuf,
    artifacts_dir: PathBuf,
}

impl GitSource {
    pub fn new(repo: impl Into<PathBuf>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::SourceState(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceState for GitSource {
    async fn tree_hash(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD^{tree}"]).await
    }

    async fn head_commit(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn checkout_bundle(&self) -> Result<BundleHandle> {
        tokio::fs::create_dir_all(&self.artifacts_dir).await?;
        let target = std::path::absolute(self.artifacts_dir.join("repo.bundle"))?;
        let target = target.to_string_lossy();

        self.git(&["bundle", "create", &target, "HEAD"]).await?;
        debug!(bundle = %target, "created checkout bundle");
        Ok(BundleHandle::new(BUNDLE_ARTIFACT))
    }
}
