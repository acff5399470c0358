//! Installs the pinned Helm release and the helm-diff plugin.

use std::path::{Path, PathBuf};

use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::ReleaseError;
use crate::platform;
use crate::tools;

const DOWNLOAD_BASE_URL: &str = "https://get.helm.sh";
const HELM_DIFF_PLUGIN: &str = "https://github.com/databus23/helm-diff";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmStatus {
    pub path: Option<PathBuf>,
    pub version: Option<semver::Version>,
}

impl HelmStatus {
    pub fn matches(&self, wanted: &semver::Version) -> bool {
        self.path.is_some() && self.version.as_ref() == Some(wanted)
    }
}

pub struct HelmInstaller {
    http: Client,
    version: semver::Version,
    bin_dir: PathBuf,
    download_dir: PathBuf,
    auto_install: bool,
}

impl HelmInstaller {
    pub fn new(
        http: Client,
        version: semver::Version,
        bin_dir: PathBuf,
        download_dir: PathBuf,
        auto_install: bool,
    ) -> Self {
        Self {
            http,
            version,
            bin_dir,
            download_dir,
            auto_install,
        }
    }

    pub async fn detect(&self) -> HelmStatus {
        let Some(path) = tools::find("helm", Some(&self.bin_dir)) else {
            return HelmStatus {
                path: None,
                version: None,
            };
        };
        let version = installed_version(&path).await;
        HelmStatus {
            path: Some(path),
            version,
        }
    }

    /// Path to a helm binary at the pinned version with helm-diff available,
    /// installing either when missing.
    pub async fn ensure(&self) -> Result<PathBuf, ReleaseError> {
        let status = self.detect().await;
        let bin = match status.path {
            Some(ref path) if status.matches(&self.version) => {
                debug!(path = %path.display(), version = %self.version, "helm already installed");
                path.clone()
            }
            _ if !self.auto_install => return Err(ReleaseError::NotInstalled(self.version.clone())),
            _ => {
                info!(
                    found = ?status.version.as_ref().map(ToString::to_string),
                    wanted = %self.version,
                    "installing helm"
                );
                let bin = self.install().await?;
                let installed = installed_version(&bin).await;
                if installed.as_ref() != Some(&self.version) {
                    return Err(ReleaseError::Install(format!(
                        "installed binary reports version {installed:?}, expected {}",
                        self.version
                    )));
                }
                bin
            }
        };

        ensure_diff_plugin(&bin).await?;
        Ok(bin)
    }

    async fn install(&self) -> Result<PathBuf, ReleaseError> {
        let target = platform::detect()?.helm_target();
        let archive = archive_name(&self.version, &target);
        let archive_url = format!("{DOWNLOAD_BASE_URL}/{archive}");
        let checksum_url = format!("{archive_url}.sha256sum");

        let bytes = self.download(&archive_url).await?;
        let checksum = String::from_utf8_lossy(&self.download(&checksum_url).await?).into_owned();
        verify_checksum(&archive, &bytes, &checksum)?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ReleaseError::Io { path, source }
        };

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(io_err(&self.download_dir))?;
        let archive_path = self.download_dir.join(&archive);
        tokio::fs::write(&archive_path, &bytes)
            .await
            .map_err(io_err(&archive_path))?;

        let status = tokio::process::Command::new("tar")
            .arg("-zxf")
            .arg(&archive_path)
            .arg("-C")
            .arg(&self.download_dir)
            .status()
            .await
            .map_err(|source| ReleaseError::Spawn {
                command: "tar".to_string(),
                source,
            })?;
        if !status.success() {
            return Err(ReleaseError::Install(format!(
                "extracting {archive} exited with {status}"
            )));
        }

        let extracted_dir = self.download_dir.join(&target);
        let extracted = extracted_dir.join(binary_name());
        tokio::fs::create_dir_all(&self.bin_dir)
            .await
            .map_err(io_err(&self.bin_dir))?;
        let bin = self.bin_dir.join(binary_name());
        // Rename fails across filesystems; copy instead.
        tokio::fs::copy(&extracted, &bin)
            .await
            .map_err(io_err(&extracted))?;
        make_executable(&bin)?;

        remove_leftover(&archive_path).await;
        remove_leftover(&extracted_dir).await;

        info!(path = %bin.display(), version = %self.version, "helm installed");
        Ok(bin)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ReleaseError> {
        debug!(url, "downloading");
        let download_err = |source: reqwest::Error| ReleaseError::Download {
            url: url.to_string(),
            source,
        };
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?
            .bytes()
            .await
            .map_err(download_err)?;
        Ok(bytes.to_vec())
    }
}

async fn ensure_diff_plugin(bin: &Path) -> Result<(), ReleaseError> {
    let output = tokio::process::Command::new(bin)
        .args(["plugin", "list"])
        .output()
        .await
        .map_err(|source| ReleaseError::Spawn {
            command: "helm plugin list".to_string(),
            source,
        })?;

    if has_diff_plugin(&String::from_utf8_lossy(&output.stdout)) {
        debug!("helm-diff plugin already installed");
        return Ok(());
    }

    info!(plugin = HELM_DIFF_PLUGIN, "installing helm-diff plugin");
    let output = tokio::process::Command::new(bin)
        .args(["plugin", "install", HELM_DIFF_PLUGIN])
        .output()
        .await
        .map_err(|source| ReleaseError::Spawn {
            command: "helm plugin install".to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ReleaseError::Install(format!(
            "helm plugin install failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

async fn installed_version(bin: &Path) -> Option<semver::Version> {
    let output = tokio::process::Command::new(bin)
        .args(["version", "--template", "{{.Version}}"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_version(&String::from_utf8_lossy(&output.stdout))
}

/// `v3.15.0` / `v3.15.0-rc.1+g1234` → `3.15.0`.
fn parse_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().to_lowercase();
    let core = trimmed.trim_start_matches('v');
    let core = core.split(['-', '+']).next()?;
    semver::Version::parse(core).ok()
}

fn has_diff_plugin(plugin_list: &str) -> bool {
    plugin_list
        .lines()
        .skip(1)
        .any(|line| line.split_whitespace().next() == Some("diff"))
}

fn archive_name(version: &semver::Version, target: &str) -> String {
    format!("helm-v{version}-{target}.tar.gz")
}

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "helm.exe"
    } else {
        "helm"
    }
}

fn verify_checksum(file: &str, bytes: &[u8], checksum_file: &str) -> Result<(), ReleaseError> {
    let expected = checksum_file
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let actual = format!("{:x}", Sha256::digest(bytes));
    if expected != actual {
        return Err(ReleaseError::Checksum {
            file: file.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Best-effort removal of a download artifact; a missing path is fine.
async fn remove_leftover(path: &Path) {
    let removed = if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => debug!(path = %path.display(), "removed download leftover"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove download leftover"),
    }
}

fn make_executable(path: &Path) -> Result<(), ReleaseError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(
            |source| ReleaseError::Io {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
