//! GitLab webhook payloads (merge request and note hooks).

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Receiver, SchemaError};
use crate::command;
use crate::event::{Command, EventKind, MergeRequest, PullRequestEvent, Repo, StatusTarget};

pub const EVENT_HEADER: &str = "X-Gitlab-Event";

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum EventType {
    MergeRequest,
    Note,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
    git_http_url: String,
}

/// Fields every hook shares.
#[derive(Debug, Deserialize)]
struct Envelope {
    event_type: EventType,
    user: User,
    project: Project,
}

#[derive(Debug, Deserialize)]
struct LastCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestAttributes {
    iid: u64,
    source_branch: String,
    last_commit: LastCommit,
    /// Absent on manually triggered test deliveries.
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestHook {
    object_attributes: MergeRequestAttributes,
}

#[derive(Debug, Deserialize)]
struct NoteAttributes {
    noteable_type: String,
}

#[derive(Debug, Deserialize)]
struct NoteHook {
    object_attributes: NoteAttributes,
}

#[derive(Debug, Deserialize)]
struct MergeRequestNoteAttributes {
    id: u64,
    note: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestNoteHook {
    object_attributes: MergeRequestNoteAttributes,
    merge_request: MergeRequestAttributes,
}

fn parse<'a, T: Deserialize<'a>>(payload: &'a Value, stage: &'static str) -> Result<T, SchemaError> {
    T::deserialize(payload).map_err(|source| SchemaError { stage, source })
}

fn merge_request_kind(action: &str) -> Option<EventKind> {
    match action {
        "open" | "opened" | "reopen" => Some(EventKind::MrOpened),
        "close" | "closed" => Some(EventKind::MrClosed),
        "update" => Some(EventKind::MrModified),
        _ => None,
    }
}

fn merge_request(attrs: MergeRequestAttributes) -> MergeRequest {
    MergeRequest {
        iid: attrs.iid,
        head_sha: attrs.last_commit.id,
        source_branch: attrs.source_branch,
    }
}

pub struct GitLabReceiver;

impl Receiver for GitLabReceiver {
    fn canonicalize(&self, payload: &Value) -> Result<Option<PullRequestEvent>, SchemaError> {
        let envelope: Envelope = parse(payload, "gitlab webhook")?;
        let repo = Repo {
            id: envelope.project.id,
            clone_url: envelope.project.git_http_url,
        };
        let author = envelope.user.id.to_string();

        match envelope.event_type {
            EventType::MergeRequest => {
                let hook: MergeRequestHook = parse(payload, "gitlab merge request")?;
                let action = hook.object_attributes.action.clone().unwrap_or_default();
                let Some(kind) = merge_request_kind(&action) else {
                    info!(action = %action, "ignoring merge request action");
                    return Ok(None);
                };

                Ok(Some(PullRequestEvent {
                    kind,
                    repo,
                    merge_request: merge_request(hook.object_attributes),
                    author,
                    command: None,
                    comment_id: None,
                }))
            }
            EventType::Note => {
                let hook: NoteHook = parse(payload, "gitlab note")?;
                if hook.object_attributes.noteable_type != "MergeRequest" {
                    debug!(noteable_type = %hook.object_attributes.noteable_type, "ignoring note");
                    return Ok(None);
                }

                let hook: MergeRequestNoteHook = parse(payload, "gitlab merge request note")?;
                let command = command::interpret(&hook.object_attributes.note);
                let Some(kind) = command.event_kind() else {
                    debug!("note is not addressed to sparrow");
                    return Ok(None);
                };

                Ok(Some(PullRequestEvent {
                    kind,
                    repo,
                    merge_request: merge_request(hook.merge_request),
                    author,
                    command: Some(command),
                    comment_id: Some(hook.object_attributes.id),
                }))
            }
            EventType::Unsupported => {
                warn!(
                    event_type = payload.get("event_type").and_then(serde_json::Value::as_str).unwrap_or_default(),
                    "unsupported gitlab event"
                );
                Ok(None)
            }
        }
    }

    fn failure_target(&self, payload: &Value) -> Option<StatusTarget> {
        let project_id = payload.pointer("/project/id")?.as_u64()?;
        let (mr, kind) = match payload.get("event_type")?.as_str()? {
            "merge_request" => (payload.get("object_attributes")?, EventKind::MrModified),
            "note" => {
                let note = payload
                    .pointer("/object_attributes/note")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let kind = match command::interpret(note) {
                    Command::Apply { .. } => EventKind::CommentApply,
                    _ => EventKind::CommentDiff,
                };
                (payload.get("merge_request")?, kind)
            }
            _ => return None,
        };

        Some(StatusTarget {
            project_id,
            sha: mr.pointer("/last_commit/id")?.as_str()?.to_string(),
            ref_name: mr.get("source_branch")?.as_str()?.to_string(),
            kind,
        })
    }
}
