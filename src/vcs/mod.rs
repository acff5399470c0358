//! Source-control collaborator: merge-request changes, repository checkouts,
//! comments and commit statuses.

pub mod gitlab;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{ChangedFile, EventKind, PullRequestEvent, StatusTarget};
use crate::lock::LockError;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("server error: status {0}")]
    Server(u16),

    #[error("http status error: {0}")]
    HttpStatus(u16),

    #[error("timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("`git {command}` failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<reqwest::Error> for VcsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return VcsError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => VcsError::Unauthorized,
                403 => VcsError::Forbidden,
                404 => VcsError::NotFound,
                429 => VcsError::RateLimited,
                500..=599 => VcsError::Server(code),
                _ => VcsError::HttpStatus(code),
            };
        }
        VcsError::Network(e.to_string())
    }
}

/// Commit state reported on the head commit of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Running,
    Success,
    Failed,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Running => "running",
            CommitState::Success => "success",
            CommitState::Failed => "failed",
        }
    }
}

/// Status check name and description for an event kind. Kinds without a
/// status check (closures, suggestions) return `None`.
pub fn status_metadata(kind: EventKind) -> Option<(&'static str, &'static str)> {
    match kind {
        EventKind::MrOpened | EventKind::MrModified | EventKind::CommentDiff => {
            Some(("Sparrow/diff", "Generating Diff"))
        }
        EventKind::CommentApply => Some(("Sparrow/apply", "Applying Changes")),
        EventKind::MrClosed | EventKind::CommentSuggestion => None,
    }
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Files touched by the merge request.
    async fn get_changes(&self, event: &PullRequestEvent) -> Result<Vec<ChangedFile>, VcsError>;

    /// Local checkout of the repository at the event's head commit. Reuses an
    /// existing checkout of the same commit.
    async fn clone_repo_at_sha(&self, event: &PullRequestEvent) -> Result<PathBuf, VcsError>;

    async fn post_comment(&self, event: &PullRequestEvent, text: &str) -> Result<(), VcsError>;

    /// Tell the author the event was picked up.
    async fn acknowledge_event(&self, event: &PullRequestEvent) -> Result<(), VcsError>;

    async fn set_event_success(&self, target: &StatusTarget) -> Result<(), VcsError>;

    async fn set_event_failure(&self, target: &StatusTarget) -> Result<(), VcsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_like_events_share_a_status_check() {
        for kind in [EventKind::MrOpened, EventKind::MrModified, EventKind::CommentDiff] {
            assert_eq!(status_metadata(kind).map(|(name, _)| name), Some("Sparrow/diff"));
        }
        assert_eq!(
            status_metadata(EventKind::CommentApply),
            Some(("Sparrow/apply", "Applying Changes"))
        );
        assert_eq!(status_metadata(EventKind::CommentSuggestion), None);
    }
}
