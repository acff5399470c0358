//! Release manager: computes and applies chart releases against a cluster.

pub mod charts;
pub mod helm;
pub mod install;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::cluster::ClusterSession;
use crate::event::ChangedFile;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("helm dependency update failed for {chart}: {stderr}")]
    DependencyUpdate { chart: String, stderr: String },

    #[error("helm {0} is not installed and auto-install is disabled")]
    NotInstalled(semver::Version),

    #[error("helm install failed: {0}")]
    Install(String),

    #[error("download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Checksum {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

/// One chart release in one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub chart_path: PathBuf,
    pub release_name: String,
    pub namespace: String,
    /// Relative to `chart_path`.
    pub values_files: Vec<String>,
}

impl ReleaseTarget {
    pub fn values_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.values_files.iter().map(|f| self.chart_path.join(f))
    }
}

#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Human-readable diff between the deployed release and the chart.
    async fn generate_diff(
        &self,
        target: &ReleaseTarget,
        session: &ClusterSession,
    ) -> Result<String, ReleaseError>;

    /// Upgrade the release, installing it if absent. Returns the tool's log.
    async fn upgrade_or_install(
        &self,
        target: &ReleaseTarget,
        session: &ClusterSession,
    ) -> Result<String, ReleaseError>;

    fn detect_changed_releases(&self, repo_root: &Path, changes: &[ChangedFile]) -> Vec<PathBuf> {
        charts::detect_changed_charts(repo_root, changes)
    }
}
