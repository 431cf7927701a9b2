//! Repository and workflow-run representations.
//!
//! Runs are created when a CI provider reports a terminal state and are
//! upserted by their provider run ID, so repeated webhooks for the same run
//! converge on a single row.

use serde::{Deserialize, Serialize};

/// A source repository watched for CI runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Unique identifier (assigned by storage layer).
    pub id: Option<i64>,

    /// Provider-side repository ID (globally unique).
    pub provider_id: i64,

    /// Repository owner login.
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Whether the repository is private.
    pub private: bool,
}

impl Repository {
    /// Creates a new repository record.
    #[must_use]
    pub const fn new(provider_id: i64, owner: String, name: String, private: bool) -> Self {
        Self {
            id: None,
            provider_id,
            owner,
            name,
            private,
        }
    }

    /// Returns the `owner/name` full name.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run completed successfully.
    Success,
    /// The run failed.
    Failure,
    /// The run was cancelled before completion.
    Cancelled,
    /// The run timed out.
    TimedOut,
    /// The run was skipped.
    Skipped,
}

impl RunStatus {
    /// Returns the canonical string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a provider conclusion string, defaulting to `Failure` for
    /// unknown terminal states so they still get analyzed.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "cancelled" => Self::Cancelled,
            "timed_out" => Self::TimedOut,
            "skipped" => Self::Skipped,
            _ => Self::Failure,
        }
    }
}

/// A single CI workflow run.
///
/// A run exclusively owns its chunks and its analysis result; deleting the
/// run cascades to both. The status is terminal once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier (assigned by storage layer).
    pub id: Option<i64>,

    /// Provider-side run ID (unique; upsert key).
    pub provider_run_id: i64,

    /// Owning repository ID.
    pub repository_id: i64,

    /// Workflow name.
    pub workflow_name: String,

    /// Terminal run status.
    pub status: RunStatus,

    /// What triggered the run (push, pull_request, schedule, ...).
    pub trigger: String,

    /// Head commit SHA.
    pub commit_sha: String,

    /// Branch name.
    pub branch: String,

    /// Actor that initiated the run.
    pub actor: String,

    /// Provider URL for the run.
    pub provider_url: String,

    /// Unix timestamp when the run was recorded.
    pub created_at: i64,
}

impl WorkflowRun {
    /// Creates a new run record with the given provider identity.
    #[must_use]
    pub fn new(provider_run_id: i64, repository_id: i64, workflow_name: String) -> Self {
        Self {
            id: None,
            provider_run_id,
            repository_id,
            workflow_name,
            status: RunStatus::Failure,
            trigger: String::new(),
            commit_sha: String::new(),
            branch: String::new(),
            actor: String::new(),
            provider_url: String::new(),
            created_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_full_name() {
        let repo = Repository::new(42, "octocat".to_string(), "hello".to_string(), false);
        assert_eq!(repo.full_name(), "octocat/hello");
        assert!(repo.id.is_none());
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::Success,
            RunStatus::Failure,
            RunStatus::Cancelled,
            RunStatus::TimedOut,
            RunStatus::Skipped,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_run_status_unknown_defaults_to_failure() {
        assert_eq!(RunStatus::parse("action_required"), RunStatus::Failure);
    }

    #[test]
    fn test_workflow_run_new() {
        let run = WorkflowRun::new(1001, 1, "CI".to_string());
        assert_eq!(run.provider_run_id, 1001);
        assert_eq!(run.repository_id, 1);
        assert_eq!(run.status, RunStatus::Failure);
        assert!(run.id.is_none());
    }
}
