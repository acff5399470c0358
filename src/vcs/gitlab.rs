//! GitLab REST v4 source-control client.
//!
//! Endpoints used:
//! - GET  /projects/:id/merge_requests/:iid/diffs
//! - POST /projects/:id/merge_requests/:iid/notes
//! - POST /projects/:id/merge_requests/:iid/notes/:note_id/award_emoji
//! - GET  /projects/:id/pipelines/latest?ref=
//! - POST /projects/:id/statuses/:sha

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{status_metadata, CommitState, SourceControl, VcsError};
use crate::event::{ChangedFile, EventKind, PullRequestEvent, StatusTarget};
use crate::lock::LeaseTable;

const PER_PAGE: usize = 100;
const ACK_EMOJI: &str = "eyes";

#[derive(Debug, Deserialize)]
struct GitLabDiff {
    old_path: String,
    new_path: String,
}

#[derive(Debug, Deserialize)]
struct GitLabPipeline {
    id: u64,
}

#[derive(Debug, Serialize)]
struct NoteBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct EmojiBody<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CommitStatusBody<'a> {
    state: &'a str,
    name: &'a str,
    description: &'a str,
    #[serde(rename = "ref")]
    ref_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GitLab {
    http: Client,
    base_api: String,
    token: String,
    clone_dir: PathBuf,
    /// One clone at a time per checkout path.
    checkouts: Arc<LeaseTable<PathBuf>>,
}

impl GitLab {
    /// `base_url` is the instance root, e.g. `https://gitlab.example.com`.
    pub fn new(
        http: Client,
        base_url: &str,
        token: String,
        clone_dir: PathBuf,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_api: format!("{}/api/v4", base_url.trim_end_matches('/')),
            token,
            clone_dir,
            checkouts: Arc::new(LeaseTable::new(lock_timeout)),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    fn checkout_path(&self, repo_id: u64, sha: &str) -> PathBuf {
        self.clone_dir.join(format!("{repo_id}-{sha}"))
    }

    /// Where a clone is built before it is renamed to its checkout path.
    fn staging_path(&self, repo_id: u64, sha: &str) -> PathBuf {
        self.clone_dir.join(format!(".{repo_id}-{sha}.partial"))
    }

    /// Embed the access token into an https clone URL.
    fn authenticated_url(&self, url: &str) -> String {
        match url.strip_prefix("https://") {
            Some(rest) if !self.token.is_empty() => format!("https://oauth2:{}@{rest}", self.token),
            _ => url.to_string(),
        }
    }

    fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "***")
        }
    }

    async fn comment(&self, project_id: u64, mr_iid: u64, text: &str) -> Result<(), VcsError> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{mr_iid}/notes",
            self.base_api
        );
        self.authorized(self.http.post(url))
            .json(&NoteBody { body: text })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn react(&self, project_id: u64, mr_iid: u64, note_id: u64) -> Result<(), VcsError> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{mr_iid}/notes/{note_id}/award_emoji",
            self.base_api
        );
        let resp = self
            .authorized(self.http.post(url))
            .json(&EmojiBody { name: ACK_EMOJI })
            .send()
            .await?;
        // Re-delivered webhooks award the same emoji twice.
        if resp.status() == StatusCode::CONFLICT {
            debug!(note_id, "acknowledgement emoji already present");
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn latest_pipeline(&self, project_id: u64, ref_name: &str) -> Option<u64> {
        let url = format!("{}/projects/{project_id}/pipelines/latest", self.base_api);
        let resp = self
            .authorized(self.http.get(url))
            .query(&[("ref", ref_name)])
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match resp {
            Ok(resp) => match resp.json::<GitLabPipeline>().await {
                Ok(pipeline) => Some(pipeline.id),
                Err(e) => {
                    warn!(ref_name, error = %e, "unreadable pipeline response");
                    None
                }
            },
            Err(e) => {
                debug!(ref_name, error = %e, "no pipeline found for ref");
                None
            }
        }
    }

    async fn set_status(&self, target: &StatusTarget, state: CommitState) -> Result<(), VcsError> {
        let Some((name, description)) = status_metadata(target.kind) else {
            debug!(kind = %target.kind, "event kind has no status check");
            return Ok(());
        };

        // Attach to the branch's pipeline so GitLab does not open a detached
        // external pipeline for every status update.
        let pipeline_id = self.latest_pipeline(target.project_id, &target.ref_name).await;

        let url = format!(
            "{}/projects/{}/statuses/{}",
            self.base_api, target.project_id, target.sha
        );
        self.authorized(self.http.post(url))
            .json(&CommitStatusBody {
                state: state.as_str(),
                name,
                description,
                ref_name: &target.ref_name,
                pipeline_id,
            })
            .send()
            .await?
            .error_for_status()?;

        info!(
            project = target.project_id,
            sha = %target.sha,
            state = state.as_str(),
            name,
            "commit status updated"
        );
        Ok(())
    }

    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), VcsError> {
        let mut cmd = tokio::process::Command::new("git");
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let command = self.redact(&args.join(" "));

        let output = cmd.output().await.map_err(|e| VcsError::Git {
            command: command.clone(),
            stderr: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(VcsError::Git {
                command,
                stderr: self.redact(String::from_utf8_lossy(&output.stderr).trim()),
            });
        }
        Ok(())
    }

    async fn fresh_clone(&self, url: &str, path: &Path, sha: &str) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy().into_owned();
        self.git(&["clone", "--depth", "1", url, path_str.as_str()], None)
            .await?;
        self.git(&["fetch", "--depth", "1", "origin", sha], Some(path)).await?;
        self.git(&["checkout", sha], Some(path)).await
    }
}

#[async_trait]
impl SourceControl for GitLab {
    async fn get_changes(&self, event: &PullRequestEvent) -> Result<Vec<ChangedFile>, VcsError> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/diffs",
            self.base_api, event.repo.id, event.merge_request.iid
        );

        let mut changes = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: Vec<GitLabDiff> = self
                .authorized(self.http.get(&url))
                .query(&[("page", page), ("per_page", PER_PAGE)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let count = batch.len();
            changes.extend(
                batch
                    .into_iter()
                    .map(|d| ChangedFile::new(d.old_path, d.new_path)),
            );
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        debug!(
            repo = event.repo.id,
            mr = event.merge_request.iid,
            files = changes.len(),
            "fetched merge request changes"
        );
        Ok(changes)
    }

    async fn clone_repo_at_sha(&self, event: &PullRequestEvent) -> Result<PathBuf, VcsError> {
        let sha = &event.merge_request.head_sha;
        let path = self.checkout_path(event.repo.id, sha);

        let _lease = self.checkouts.acquire(path.clone()).await?;
        if path.is_dir() {
            info!(path = %path.display(), "checkout already exists, skipping clone");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.clone_dir)
            .await
            .map_err(|source| VcsError::Io {
                path: self.clone_dir.clone(),
                source,
            })?;

        // Only this holder of the lease writes the staging directory, so
        // anything already there is left from an interrupted run.
        let staging = self.staging_path(event.repo.id, sha);
        remove_dir_if_present(&staging).await?;

        info!(repo = event.repo.id, sha = %sha, "cloning repository");
        let url = self.authenticated_url(&event.repo.clone_url);
        if let Err(e) = self.fresh_clone(&url, &staging, sha).await {
            if let Err(cleanup) = remove_dir_if_present(&staging).await {
                warn!(path = %staging.display(), error = %cleanup, "failed to remove partial clone");
            }
            return Err(e);
        }

        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| VcsError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    async fn post_comment(&self, event: &PullRequestEvent, text: &str) -> Result<(), VcsError> {
        self.comment(event.repo.id, event.merge_request.iid, text).await
    }

    async fn acknowledge_event(&self, event: &PullRequestEvent) -> Result<(), VcsError> {
        match event.kind {
            EventKind::MrOpened
            | EventKind::MrModified
            | EventKind::CommentDiff
            | EventKind::CommentApply => {
                self.set_status(&event.status_target(), CommitState::Running)
                    .await?;
                if let (true, Some(note_id)) = (event.kind.is_comment(), event.comment_id) {
                    self.react(event.repo.id, event.merge_request.iid, note_id)
                        .await?;
                }
                Ok(())
            }
            EventKind::CommentSuggestion => match &event.command {
                Some(crate::event::Command::Suggestion { text }) => {
                    self.comment(event.repo.id, event.merge_request.iid, text).await
                }
                _ => Ok(()),
            },
            EventKind::MrClosed => {
                warn!(kind = %event.kind, "event kind is not acknowledged");
                Ok(())
            }
        }
    }

    async fn set_event_success(&self, target: &StatusTarget) -> Result<(), VcsError> {
        self.set_status(target, CommitState::Success).await
    }

    async fn set_event_failure(&self, target: &StatusTarget) -> Result<(), VcsError> {
        self.set_status(target, CommitState::Failed).await
    }
}

async fn remove_dir_if_present(path: &Path) -> Result<(), VcsError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(VcsError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
