//! Error types for Decider.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Construction errors
    #[error("Job \"{job}\" depends on unknown job \"{dependency}\"")]
    UnresolvedDependency { job: String, dependency: String },

    #[error("Dependency cycle between jobs: {}", .jobs.join(" -> "))]
    DependencyCycle { jobs: Vec<String> },

    #[error(
        "Job \"{logical_name}\" is already registered as {existing}, cannot register it as {requested}"
    )]
    PolicyConflict {
        logical_name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Job \"{logical_name}\" is registered twice in one decision run")]
    DuplicateJob { logical_name: String },

    #[error("Invalid logical job name: {0:?}")]
    InvalidLogicalName(String),

    #[error("Job \"{0}\" cannot depend on itself")]
    SelfDependency(String),

    // Trigger and configuration errors
    #[error("Missing environment override {0} required by this trigger")]
    MissingOverride(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Source state errors
    #[error("Source state unavailable: {0}")]
    SourceState(String),

    // Execution backend errors
    #[error("Execution backend error: {0}")]
    Backend(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Artifact not found: {path} on job {job_id}")]
    ArtifactNotFound { job_id: String, path: String },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_dependency_names_both_jobs() {
        let err = Error::UnresolvedDependency {
            job: "docs-upload".to_string(),
            dependency: "docs-build".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("docs-upload"));
        assert!(msg.contains("docs-build"));
    }

    #[test]
    fn test_cycle_lists_path() {
        let err = Error::DependencyCycle {
            jobs: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Dependency cycle between jobs: a -> b -> a");
    }
}
