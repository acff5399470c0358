//! Helm CLI release manager. Requires the helm-diff plugin.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ReleaseError, ReleaseManager, ReleaseTarget};
use crate::cluster::ClusterSession;

pub const NO_CHANGES: &str =
    "No changes for the chart in this environment were detected. Everything is up to date.";

pub struct Helm {
    bin: PathBuf,
    /// Lines of context around diff hunks; negative leaves helm-diff's default.
    diff_context: i64,
    apply_dry_run: bool,
}

impl Helm {
    pub fn new(bin: PathBuf, diff_context: i64, apply_dry_run: bool) -> Self {
        Self {
            bin,
            diff_context,
            apply_dry_run,
        }
    }

    fn diff_args(&self, target: &ReleaseTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "diff".into(),
            "upgrade".into(),
            target.release_name.clone().into(),
            target.chart_path.clone().into(),
            "--allow-unreleased".into(),
            "--namespace".into(),
            target.namespace.clone().into(),
        ];
        push_values(&mut args, target);
        if self.diff_context >= 0 {
            args.push("--context".into());
            args.push(self.diff_context.to_string().into());
        }
        args
    }

    fn upgrade_args(&self, target: &ReleaseTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "upgrade".into(),
            "--install".into(),
            target.release_name.clone().into(),
            target.chart_path.clone().into(),
            "--namespace".into(),
            target.namespace.clone().into(),
        ];
        push_values(&mut args, target);
        if self.apply_dry_run {
            args.push("--dry-run".into());
        }
        args
    }

    async fn run(&self, args: &[OsString], session: &ClusterSession) -> Result<Output, ReleaseError> {
        let command = render(&self.bin, args);
        debug!(command = %command, cluster = session.cluster(), "running helm");

        tokio::process::Command::new(&self.bin)
            .args(args)
            .envs(session.env())
            .output()
            .await
            .map_err(|source| ReleaseError::Spawn { command, source })
    }

    async fn dependency_update(
        &self,
        target: &ReleaseTarget,
        session: &ClusterSession,
    ) -> Result<(), ReleaseError> {
        let args: Vec<OsString> = vec![
            "dependency".into(),
            "update".into(),
            target.chart_path.clone().into(),
        ];
        let output = self.run(&args, session).await?;
        if !output.status.success() {
            return Err(ReleaseError::DependencyUpdate {
                chart: target.chart_path.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseManager for Helm {
    async fn generate_diff(
        &self,
        target: &ReleaseTarget,
        session: &ClusterSession,
    ) -> Result<String, ReleaseError> {
        self.dependency_update(target, session).await?;

        let output = self.run(&self.diff_args(target), session).await?;
        if !output.status.success() {
            warn!(release = %target.release_name, status = %output.status, "helm diff exited non-zero");
        }

        let text = select_output(&output);
        Ok(if text.is_empty() {
            NO_CHANGES.to_string()
        } else {
            text
        })
    }

    async fn upgrade_or_install(
        &self,
        target: &ReleaseTarget,
        session: &ClusterSession,
    ) -> Result<String, ReleaseError> {
        self.dependency_update(target, session).await?;

        info!(
            release = %target.release_name,
            namespace = %target.namespace,
            dry_run = self.apply_dry_run,
            "running helm upgrade"
        );
        let output = self.run(&self.upgrade_args(target), session).await?;
        if !output.status.success() {
            warn!(release = %target.release_name, status = %output.status, "helm upgrade exited non-zero");
        }
        Ok(select_output(&output))
    }
}

fn push_values(args: &mut Vec<OsString>, target: &ReleaseTarget) {
    for path in target.values_paths() {
        args.push("-f".into());
        args.push(path.into());
    }
}

/// Helm reports errors and some warnings on stderr; surface that when present.
fn select_output(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn render(bin: &std::path::Path, args: &[OsString]) -> String {
    std::iter::once(bin.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
