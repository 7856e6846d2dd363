//! Tests for the git source provider.

use crate::source::GitSource;
use decider_core::ports::SourceState;

#[tokio::test]
async fn test_directory_without_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    let source = GitSource::new(dir.path(), dir.path().join("artifacts"));

    assert!(source.tree_hash().await.is_err());
    assert!(source.head_commit().await.is_err());
}
