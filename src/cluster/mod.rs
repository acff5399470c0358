//! Cluster providers and scoped credential sessions.
//!
//! `Authenticator::authenticate` returns a `ClusterSession` that owns whatever
//! credential material the provider needed. The session hands the kubeconfig
//! path to child processes explicitly; nothing is written into the process
//! environment. Dropping the session removes any credential file it created.

pub mod azure;

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lock::{Lease, LeaseTable, LockError};

/// Environment variable cluster tooling reads its kubeconfig path from.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid provider configuration for cluster `{cluster}`: {reason}")]
    InvalidProviderConfig { cluster: String, reason: String },

    /// Credential retrieval or authorization failure. The message carries the
    /// distinction between missing credentials and missing permissions.
    #[error("{0}")]
    Authentication(String),

    #[error("credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    Local(LocalCluster),
    Azure(AzureCluster),
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Local(_) => "local",
            ProviderConfig::Azure(_) => "azure",
        }
    }
}

/// A cluster reachable with a kubeconfig already on disk. `None` leaves
/// tooling on its default kubeconfig lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCluster {
    pub kubeconfig: Option<PathBuf>,
}

/// An AKS managed cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCluster {
    pub cluster_name: String,
    pub resource_group: String,
}

/// Source of AKS administrator kubeconfigs.
#[async_trait]
pub trait AksCredentialSource: Send + Sync {
    async fn admin_kubeconfig(
        &self,
        resource_group: &str,
        cluster_name: &str,
    ) -> Result<String, ClusterError>;
}

/// Credentials for one cluster, valid until dropped.
#[derive(Debug)]
pub struct ClusterSession {
    cluster: String,
    kubeconfig: Option<PathBuf>,
    owned_file: Option<PathBuf>,
    _lease: Option<Lease>,
}

impl ClusterSession {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    /// Environment bindings to set on a child process run against this cluster.
    pub fn env(&self) -> Vec<(&'static str, OsString)> {
        self.kubeconfig
            .iter()
            .map(|path| (KUBECONFIG_ENV, path.clone().into_os_string()))
            .collect()
    }
}

impl Drop for ClusterSession {
    fn drop(&mut self) {
        if let Some(path) = self.owned_file.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed kubeconfig"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove kubeconfig"),
            }
        }
    }
}

pub struct Authenticator {
    kubeconfig_dir: PathBuf,
    aks: Arc<dyn AksCredentialSource>,
    files: LeaseTable<PathBuf>,
}

impl Authenticator {
    pub fn new(
        kubeconfig_dir: PathBuf,
        aks: Arc<dyn AksCredentialSource>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            kubeconfig_dir,
            aks,
            files: LeaseTable::new(lock_timeout),
        }
    }

    pub async fn authenticate(&self, cluster: &Cluster) -> Result<ClusterSession, ClusterError> {
        match &cluster.provider {
            ProviderConfig::Local(local) => Ok(ClusterSession {
                cluster: cluster.name.clone(),
                kubeconfig: local.kubeconfig.clone(),
                owned_file: None,
                _lease: None,
            }),
            ProviderConfig::Azure(aks) => self.authenticate_aks(&cluster.name, aks).await,
        }
    }

    async fn authenticate_aks(
        &self,
        name: &str,
        aks: &AzureCluster,
    ) -> Result<ClusterSession, ClusterError> {
        if aks.cluster_name.is_empty() || aks.resource_group.is_empty() {
            return Err(ClusterError::InvalidProviderConfig {
                cluster: name.to_string(),
                reason: "resource group and cluster name must be provided to authenticate to an Azure cluster"
                    .to_string(),
            });
        }

        for (field, value) in [
            ("resource group", &aks.resource_group),
            ("cluster name", &aks.cluster_name),
        ] {
            if !is_single_component(value) {
                return Err(ClusterError::InvalidProviderConfig {
                    cluster: name.to_string(),
                    reason: format!("{field} `{value}` must be a plain name without path separators"),
                });
            }
        }

        let dir = self.kubeconfig_dir.join(&aks.resource_group);
        let path = dir.join(format!("{}.yaml", aks.cluster_name));

        // Held for the life of the session so no other scope rewrites or
        // deletes this file underneath it.
        let lease = self.files.acquire(path.clone()).await?;

        info!(cluster = name, resource_group = %aks.resource_group, "fetching AKS admin credentials");
        let kubeconfig = self
            .aks
            .admin_kubeconfig(&aks.resource_group, &aks.cluster_name)
            .await?;

        write_private_file(&dir, &path, kubeconfig.as_bytes())?;
        debug!(path = %path.display(), "wrote kubeconfig");

        Ok(ClusterSession {
            cluster: name.to_string(),
            kubeconfig: Some(path.clone()),
            owned_file: Some(path),
            _lease: Some(lease),
        })
    }
}

/// True when `value` names exactly one ordinary path entry.
fn is_single_component(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !value.contains(['/', '\\'])
}

/// Replace `path` with `contents`, readable and writable by the owner only.
fn write_private_file(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), ClusterError> {
    write_private_file_with(dir, path, |file| file.write_all(contents))
}

/// Creates `path` owner-only and hands it to `fill`; a failed fill removes
/// the file again.
fn write_private_file_with<F>(dir: &Path, path: &Path, fill: F) -> Result<(), ClusterError>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let io_err = |source| ClusterError::Io {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale kubeconfig"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    std::fs::create_dir_all(dir).map_err(|source| ClusterError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;
    if let Err(e) = fill(&mut file) {
        drop(file);
        if let Err(cleanup) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "failed to remove partial kubeconfig");
        }
        return Err(io_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeAks {
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    impl FakeAks {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: None,
            })
        }
    }

    #[async_trait]
    impl AksCredentialSource for FakeAks {
        async fn admin_kubeconfig(
            &self,
            resource_group: &str,
            cluster_name: &str,
        ) -> Result<String, ClusterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(msg) => Err(ClusterError::Authentication(msg.clone())),
                None => Ok(format!("# {resource_group}/{cluster_name}\napiVersion: v1\n")),
            }
        }
    }

    fn aks_cluster(name: &str, rg: &str) -> Cluster {
        Cluster {
            name: "dev".to_string(),
            provider: ProviderConfig::Azure(AzureCluster {
                cluster_name: name.to_string(),
                resource_group: rg.to_string(),
            }),
        }
    }

    fn authenticator(dir: &Path, aks: Arc<FakeAks>) -> Authenticator {
        Authenticator::new(dir.to_path_buf(), aks, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn local_session_uses_static_kubeconfig() {
        let dir = TempDir::new().unwrap();
        let auth = authenticator(dir.path(), FakeAks::ok());
        let cluster = Cluster {
            name: "kind".to_string(),
            provider: ProviderConfig::Local(LocalCluster {
                kubeconfig: Some(PathBuf::from("/etc/kube/kind.yaml")),
            }),
        };

        let session = auth.authenticate(&cluster).await.unwrap();
        assert_eq!(session.kubeconfig(), Some(Path::new("/etc/kube/kind.yaml")));
        assert_eq!(session.env()[0].0, KUBECONFIG_ENV);
        drop(session);
        // Local credentials are never removed.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn aks_session_writes_private_file_and_removes_it_on_drop() {
        let dir = TempDir::new().unwrap();
        let aks = FakeAks::ok();
        let auth = authenticator(dir.path(), aks.clone());

        let session = auth.authenticate(&aks_cluster("dev-aks", "dev-rg")).await.unwrap();
        let path = dir.path().join("dev-rg").join("dev-aks.yaml");
        assert_eq!(session.kubeconfig(), Some(path.as_path()));
        assert!(std::fs::read_to_string(&path).unwrap().contains("dev-rg/dev-aks"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        drop(session);
        assert!(!path.exists());
        assert_eq!(aks.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn file_is_removed_when_scope_errors() {
        let dir = TempDir::new().unwrap();
        let auth = authenticator(dir.path(), FakeAks::ok());
        let path = dir.path().join("rg").join("aks.yaml");

        let result: Result<(), ClusterError> = async {
            let _session = auth.authenticate(&aks_cluster("aks", "rg")).await?;
            assert!(path.exists());
            Err(ClusterError::Authentication("boom".to_string()))
        }
        .await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stale_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rg").join("aks.yaml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale").unwrap();

        let auth = authenticator(dir.path(), FakeAks::ok());
        let session = auth.authenticate(&aks_cluster("aks", "rg")).await.unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("stale"));
        drop(session);
    }

    #[tokio::test]
    async fn missing_aks_fields_fail_fast() {
        let dir = TempDir::new().unwrap();
        let aks = FakeAks::ok();
        let auth = authenticator(dir.path(), aks.clone());

        let err = auth.authenticate(&aks_cluster("", "rg")).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidProviderConfig { .. }));
        assert_eq!(aks.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn names_that_escape_the_kubeconfig_dir_are_rejected() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("kubeconfigs");
        let aks = FakeAks::ok();
        let auth = authenticator(&dir, aks.clone());

        for (name, rg) in [
            ("aks", "../.."),
            ("aks", ".."),
            ("aks", "a/b"),
            ("../../escaped", "rg"),
            ("a/b", "rg"),
            ("aks", "/tmp"),
            ("aks", "."),
        ] {
            let err = auth.authenticate(&aks_cluster(name, rg)).await.unwrap_err();
            assert!(
                matches!(err, ClusterError::InvalidProviderConfig { .. }),
                "{rg}/{name}: {err}"
            );
        }
        assert_eq!(aks.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_write_removes_the_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rg").join("aks.yaml");

        let err = write_private_file_with(&dir.path().join("rg"), &path, |file| {
            file.write_all(b"apiVersion: v1\n")?;
            Err(std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"))
        })
        .unwrap_err();

        assert!(matches!(err, ClusterError::Io { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn provider_failure_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let aks = Arc::new(FakeAks {
            calls: AtomicUsize::new(0),
            fail_with: Some(azure::NO_CREDENTIALS.to_string()),
        });
        let auth = authenticator(dir.path(), aks);

        let err = auth.authenticate(&aks_cluster("aks", "rg")).await.unwrap_err();
        assert_eq!(err.to_string(), azure::NO_CREDENTIALS);
        assert!(!dir.path().join("rg").join("aks.yaml").exists());
    }

    #[tokio::test]
    async fn concurrent_scopes_for_same_cluster_are_serialised() {
        let dir = TempDir::new().unwrap();
        let auth = authenticator(dir.path(), FakeAks::ok());

        let _first = auth.authenticate(&aks_cluster("aks", "rg")).await.unwrap();
        let second = auth.authenticate(&aks_cluster("aks", "rg")).await;
        assert!(matches!(second, Err(ClusterError::Lock(_))));
    }
}
