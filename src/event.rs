//! Canonical, provider-agnostic merge-request events.
//!
//! Receivers build one `PullRequestEvent` per inbound webhook; the controller
//! consumes it exactly once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened on the merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    MrOpened,
    MrModified,
    MrClosed,
    CommentDiff,
    CommentApply,
    CommentSuggestion,
}

impl EventKind {
    pub fn is_comment(&self) -> bool {
        matches!(
            self,
            EventKind::CommentDiff | EventKind::CommentApply | EventKind::CommentSuggestion
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::MrOpened => "MR_OPENED",
            EventKind::MrModified => "MR_MODIFIED",
            EventKind::MrClosed => "MR_CLOSED",
            EventKind::CommentDiff => "COMMENT_DIFF",
            EventKind::CommentApply => "COMMENT_APPLY",
            EventKind::CommentSuggestion => "COMMENT_SUGGESTION",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: u64,
    pub clone_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Project-scoped merge request number (GitLab `iid`).
    pub iid: u64,
    pub head_sha: String,
    pub source_branch: String,
}

/// Structured operator intent parsed from a merge-request comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// `targets` are `chart[@environment]` selectors; empty means every changed chart.
    Diff { targets: Vec<String> },
    Apply { targets: Vec<String> },
    Suggestion { text: String },
    None,
}

impl Command {
    /// Event kind a comment carrying this command canonicalizes to.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            Command::Diff { .. } => Some(EventKind::CommentDiff),
            Command::Apply { .. } => Some(EventKind::CommentApply),
            Command::Suggestion { .. } => Some(EventKind::CommentSuggestion),
            Command::None => None,
        }
    }

    pub fn targets(&self) -> &[String] {
        match self {
            Command::Diff { targets } | Command::Apply { targets } => targets,
            Command::Suggestion { .. } | Command::None => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub kind: EventKind,
    pub repo: Repo,
    pub merge_request: MergeRequest,
    /// Opaque provider user id of whoever triggered the event.
    pub author: String,
    pub command: Option<Command>,
    /// Note id for comment-derived events, used for reactions.
    pub comment_id: Option<u64>,
}

impl PullRequestEvent {
    pub fn status_target(&self) -> StatusTarget {
        StatusTarget {
            project_id: self.repo.id,
            sha: self.merge_request.head_sha.clone(),
            ref_name: self.merge_request.source_branch.clone(),
            kind: self.kind,
        }
    }
}

/// Where a commit status is recorded. Derived from an event, or recovered
/// from a raw payload that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub project_id: u64,
    pub sha: String,
    pub ref_name: String,
    pub kind: EventKind,
}

/// A file touched by a merge request, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub old_path: String,
    pub new_path: String,
}

impl ChangedFile {
    pub fn new(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }

    /// Same path on both sides (plain modification).
    pub fn modified(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            old_path: path.clone(),
            new_path: path,
        }
    }
}
