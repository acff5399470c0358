//! Event orchestration: turns canonical merge-request events into diff and
//! apply runs and reports the outcome back to source control.

pub mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cluster::{Authenticator, ClusterError};
use crate::error::SparrowError;
use crate::event::{EventKind, PullRequestEvent, StatusTarget};
use crate::lock::{LeaseKey, LeaseTable};
use crate::receiver::SchemaError;
use crate::release::{ReleaseManager, ReleaseTarget};
use crate::sparrowfile::manifest::DEFAULT_NAMESPACE;
use crate::sparrowfile::{
    relative_chart_path, ChartConfiguration, ChartEnvironment, Sparrowfile, SparrowfileError,
};
use crate::vcs::SourceControl;
use report::{Operation, ReleaseOutcome};

/// A chart and the environments an operation will run against.
#[derive(Debug)]
struct PlannedRelease {
    chart: String,
    chart_dir: PathBuf,
    release_name: String,
    environments: Vec<ChartEnvironment>,
}

pub struct Controller {
    vcs: Arc<dyn SourceControl>,
    releases: Arc<dyn ReleaseManager>,
    auth: Arc<Authenticator>,
    leases: LeaseTable<LeaseKey>,
    sparrowfile_name: String,
}

impl Controller {
    pub fn new(
        vcs: Arc<dyn SourceControl>,
        releases: Arc<dyn ReleaseManager>,
        auth: Arc<Authenticator>,
        leases: LeaseTable<LeaseKey>,
        sparrowfile_name: String,
    ) -> Self {
        Self {
            vcs,
            releases,
            auth,
            leases,
            sparrowfile_name,
        }
    }

    /// Run one event to completion. Any failure is logged and reported as a
    /// failed commit status; nothing is retried.
    pub async fn handle(&self, event: PullRequestEvent) {
        info!(
            kind = %event.kind,
            repo = event.repo.id,
            mr = event.merge_request.iid,
            sha = %event.merge_request.head_sha,
            "handling event"
        );

        match self.dispatch(&event).await {
            Ok(()) => debug!(kind = %event.kind, "event handled"),
            Err(e) => {
                error!(kind = %event.kind, error_kind = %e.kind(), error = %e, "event failed");
                self.report_failure(&event.status_target()).await;
            }
        }
    }

    /// Report a delivery whose payload failed validation.
    pub async fn reject(&self, error: SchemaError, target: Option<StatusTarget>) {
        let error = SparrowError::from(error);
        error!(error_kind = %error.kind(), error = %error, "rejected webhook payload");
        match target {
            Some(target) => self.report_failure(&target).await,
            None => warn!("payload carries no commit to report the failure on"),
        }
    }

    async fn report_failure(&self, target: &StatusTarget) {
        if let Err(e) = self.vcs.set_event_failure(target).await {
            warn!(error = %e, sha = %target.sha, "could not set failure status");
        }
    }

    async fn dispatch(&self, event: &PullRequestEvent) -> Result<(), SparrowError> {
        match event.kind {
            EventKind::MrOpened | EventKind::MrModified | EventKind::CommentDiff => {
                self.run(event, Operation::Diff).await
            }
            EventKind::CommentApply => self.run(event, Operation::Apply).await,
            EventKind::CommentSuggestion => {
                self.vcs.acknowledge_event(event).await?;
                Ok(())
            }
            EventKind::MrClosed => {
                debug!("merge request closed, nothing to do");
                Ok(())
            }
        }
    }

    async fn run(&self, event: &PullRequestEvent, operation: Operation) -> Result<(), SparrowError> {
        self.vcs.acknowledge_event(event).await?;

        let changes = self.vcs.get_changes(event).await?;
        let repo_root = self.vcs.clone_repo_at_sha(event).await?;
        let charts = self.releases.detect_changed_releases(&repo_root, &changes);
        info!(files = changes.len(), charts = charts.len(), "detected changed charts");

        let sparrowfile = self.load_sparrowfile(event, &repo_root, operation).await?;

        let targets = event
            .command
            .as_ref()
            .map(|c| c.targets().to_vec())
            .unwrap_or_default();
        let plan = self
            .plan(event, &sparrowfile, &repo_root, &charts, &targets, operation)
            .await?;

        let mut outcomes = Vec::new();
        if let Err(e) = self.execute(event, &plan, operation, &mut outcomes).await {
            if let SparrowError::Cluster(
                ref auth @ (ClusterError::Authentication(_) | ClusterError::InvalidProviderConfig { .. }),
            ) = e
            {
                if !outcomes.is_empty() {
                    self.vcs
                        .post_comment(event, &report::render(operation, &outcomes))
                        .await?;
                }
                self.vcs
                    .post_comment(event, &report::authentication_failed(auth))
                    .await?;
            }
            return Err(e);
        }

        if !outcomes.is_empty() {
            self.vcs
                .post_comment(event, &report::render(operation, &outcomes))
                .await?;
        }
        self.vcs.set_event_success(&event.status_target()).await?;
        Ok(())
    }

    async fn load_sparrowfile(
        &self,
        event: &PullRequestEvent,
        repo_root: &Path,
        operation: Operation,
    ) -> Result<Sparrowfile, SparrowError> {
        match Sparrowfile::load(&repo_root.join(&self.sparrowfile_name)) {
            Ok(file) => Ok(file),
            Err(e) => {
                let comment = match &e {
                    SparrowfileError::NotFound(_) => {
                        Some(report::sparrowfile_missing(&self.sparrowfile_name, operation))
                    }
                    SparrowfileError::ClusterNotDefined(name) => {
                        Some(report::cluster_not_defined(name, operation))
                    }
                    _ => None,
                };
                if let Some(comment) = comment {
                    self.vcs.post_comment(event, &comment).await?;
                }
                Err(e.into())
            }
        }
    }

    /// Resolve every chart environment the event targets before anything runs.
    ///
    /// With no selectors every changed chart and all its environments are
    /// targeted. A selector is `chart` or `chart@environment`; its chart part
    /// names a changed chart exactly, or failing that every changed chart whose
    /// path contains it.
    async fn plan(
        &self,
        event: &PullRequestEvent,
        sparrowfile: &Sparrowfile,
        repo_root: &Path,
        charts: &[PathBuf],
        targets: &[String],
        operation: Operation,
    ) -> Result<Vec<PlannedRelease>, SparrowError> {
        let changed: Vec<(String, &PathBuf)> = charts
            .iter()
            .map(|dir| (relative_chart_path(repo_root, dir), dir))
            .collect();

        let selections: Vec<(&String, &PathBuf, Option<&str>)> = if targets.is_empty() {
            changed.iter().map(|(rel, dir)| (rel, *dir, None)).collect()
        } else {
            let mut selections = Vec::new();
            let mut unmatched = Vec::new();
            for target in targets {
                let (chart, environment) = match target.split_once('@') {
                    Some((chart, env)) => (chart.trim_end_matches('/'), Some(env)),
                    None => (target.trim_end_matches('/'), None),
                };
                let matched = select_charts(&changed, chart);
                if matched.is_empty() {
                    unmatched.push(target.clone());
                }
                for (rel, dir) in matched {
                    selections.push((rel, dir, environment));
                }
            }
            if !unmatched.is_empty() {
                info!(targets = ?unmatched, "targets match no changed chart");
                self.vcs
                    .post_comment(event, &report::unmatched_targets(&unmatched))
                    .await?;
            }
            selections
        };

        let mut plan: Vec<PlannedRelease> = Vec::new();
        for (chart, chart_dir, environment) in selections {
            let Some(config) = sparrowfile.resolve(repo_root, chart_dir)? else {
                self.vcs
                    .post_comment(event, &report::configuration_not_found(chart, operation))
                    .await?;
                continue;
            };

            let environments = match environment {
                Some(name) => match config.get_environment(name) {
                    Some(env) => vec![env.clone()],
                    None => {
                        self.vcs
                            .post_comment(event, &report::unknown_environment(name, chart))
                            .await?;
                        return Err(SparrowError::UnknownEnvironment {
                            chart: chart.clone(),
                            environment: name.to_string(),
                        });
                    }
                },
                None => config.environments.clone(),
            };

            merge_into_plan(&mut plan, chart, chart_dir, &config, environments);
        }

        Ok(plan)
    }

    async fn execute(
        &self,
        event: &PullRequestEvent,
        plan: &[PlannedRelease],
        operation: Operation,
        outcomes: &mut Vec<ReleaseOutcome>,
    ) -> Result<(), SparrowError> {
        for release in plan {
            for env in &release.environments {
                let key = LeaseKey {
                    repo: event.repo.id,
                    chart: release.chart.clone(),
                    environment: env.name.clone(),
                };
                let _lease = self.leases.acquire(key.clone()).await?;

                let session = self.auth.authenticate(&env.cluster).await?;
                let target = ReleaseTarget {
                    chart_path: release.chart_dir.clone(),
                    release_name: release.release_name.clone(),
                    namespace: env
                        .namespace
                        .clone()
                        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                    values_files: env.values_files.clone(),
                };

                info!(
                    lease = %key,
                    cluster = %env.cluster.name,
                    namespace = %target.namespace,
                    ?operation,
                    "running release operation"
                );
                let output = match operation {
                    Operation::Diff => self.releases.generate_diff(&target, &session).await?,
                    Operation::Apply => self.releases.upgrade_or_install(&target, &session).await?,
                };
                drop(session);

                outcomes.push(ReleaseOutcome {
                    chart: release.chart.clone(),
                    environment: env.name.clone(),
                    output,
                });
            }
        }
        Ok(())
    }
}

fn select_charts<'a>(changed: &'a [(String, &'a PathBuf)], chart: &str) -> Vec<(&'a String, &'a PathBuf)> {
    if chart.is_empty() {
        return Vec::new();
    }
    let exact: Vec<_> = changed
        .iter()
        .filter(|(rel, _)| rel == chart)
        .map(|(rel, dir)| (rel, *dir))
        .collect();
    if !exact.is_empty() {
        return exact;
    }
    changed
        .iter()
        .filter(|(rel, _)| rel.contains(chart))
        .map(|(rel, dir)| (rel, *dir))
        .collect()
}

/// Add environments to the chart's entry, keeping first-seen order and
/// dropping repeats from overlapping selectors.
fn merge_into_plan(
    plan: &mut Vec<PlannedRelease>,
    chart: &str,
    chart_dir: &Path,
    config: &ChartConfiguration,
    environments: Vec<ChartEnvironment>,
) {
    let index = match plan.iter().position(|p| p.chart == chart) {
        Some(i) => i,
        None => {
            plan.push(PlannedRelease {
                chart: chart.to_string(),
                chart_dir: chart_dir.to_path_buf(),
                release_name: config.release_name.clone().unwrap_or_default(),
                environments: Vec::new(),
            });
            plan.len() - 1
        }
    };

    let entry = &mut plan[index];
    for env in environments {
        if !entry.environments.iter().any(|e| e.name == env.name) {
            entry.environments.push(env);
        }
    }
}
