//! Trigger input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of event that started a decision run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Scheduled,
    AdHoc,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::PullRequest => write!(f, "pull-request"),
            TriggerKind::Scheduled => write!(f, "scheduled"),
            TriggerKind::AdHoc => write!(f, "ad-hoc"),
        }
    }
}

/// An event, already parsed by the invoking process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Branch name for push events (`refs/heads/` already stripped).
    #[serde(default)]
    pub branch_name: Option<String>,
    /// Name of an ad-hoc request, e.g. `try-windows-ami`.
    #[serde(default)]
    pub request: Option<String>,
    /// Commit the event refers to. Empty when only HEAD is known.
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub environment_overrides: BTreeMap<String, String>,
}

impl Trigger {
    pub fn push(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Push,
            branch_name: Some(branch.into()),
            request: None,
            commit: commit.into(),
            environment_overrides: BTreeMap::new(),
        }
    }

    pub fn pull_request(commit: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::PullRequest,
            branch_name: None,
            request: None,
            commit: commit.into(),
            environment_overrides: BTreeMap::new(),
        }
    }

    pub fn scheduled() -> Self {
        Self {
            kind: TriggerKind::Scheduled,
            branch_name: None,
            request: None,
            commit: String::new(),
            environment_overrides: BTreeMap::new(),
        }
    }

    pub fn ad_hoc(request: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::AdHoc,
            branch_name: None,
            request: Some(request.into()),
            commit: String::new(),
            environment_overrides: BTreeMap::new(),
        }
    }

    /// Build a trigger from the `TASK_FOR` value of a CI hook.
    ///
    /// `github-push` and `github-pull-request` map to pushes and pull
    /// requests, `daily` to a scheduled run, anything else to an ad-hoc
    /// request of that name. A `refs/heads/<branch>` git ref supplies the
    /// branch name.
    pub fn from_task_for(task_for: &str, git_ref: Option<&str>, commit: Option<&str>) -> Self {
        let branch = git_ref
            .and_then(|r| r.strip_prefix("refs/heads/"))
            .map(str::to_string);
        let commit = commit.unwrap_or_default().to_string();

        let mut trigger = match task_for {
            "github-push" => Self {
                kind: TriggerKind::Push,
                branch_name: branch,
                request: None,
                commit: String::new(),
                environment_overrides: BTreeMap::new(),
            },
            "github-pull-request" => Self::pull_request(""),
            "daily" => Self::scheduled(),
            other => Self::ad_hoc(other),
        };
        trigger.commit = commit;
        trigger
    }

    pub fn with_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.environment_overrides.extend(overrides);
        self
    }

    /// Whether the event comes from the source-hosting webhook integration.
    pub fn is_from_hosting(&self) -> bool {
        matches!(self.kind, TriggerKind::Push | TriggerKind::PullRequest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_task_for_push() {
        let trigger = Trigger::from_task_for("github-push", Some("refs/heads/auto"), Some("abc"));
        assert_eq!(trigger.kind, TriggerKind::Push);
        assert_eq!(trigger.branch_name.as_deref(), Some("auto"));
        assert_eq!(trigger.commit, "abc");
    }

    #[test]
    fn test_from_task_for_tag_ref_has_no_branch() {
        let trigger = Trigger::from_task_for("github-push", Some("refs/tags/v1"), None);
        assert_eq!(trigger.branch_name, None);
    }

    #[test]
    fn test_from_task_for_other_kinds() {
        assert_eq!(
            Trigger::from_task_for("github-pull-request", None, None).kind,
            TriggerKind::PullRequest
        );
        assert_eq!(Trigger::from_task_for("daily", None, None).kind, TriggerKind::Scheduled);

        let ami = Trigger::from_task_for("try-windows-ami", None, None);
        assert_eq!(ami.kind, TriggerKind::AdHoc);
        assert_eq!(ami.request.as_deref(), Some("try-windows-ami"));
        assert!(!ami.is_from_hosting());
    }
}
