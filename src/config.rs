use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "SPARROW_";
const AZURE_ENV_PREFIX: &str = "AZURE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub http_addr: String,
    /// Mount point for every route, e.g. `/sparrow`. Empty mounts at `/`.
    pub path_prefix: String,
    pub log_level: String,
    /// `json` or `pretty`.
    pub log_format: String,
    pub sparrowfile_name: String,
    pub vcs: VcsSettings,
    pub workspace: WorkspaceSettings,
    pub basic_auth: BasicAuthSettings,
    pub helm: HelmSettings,
    pub azure: AzureSettings,
    pub locking: LockingSettings,
    /// How long shutdown waits for webhook runs already in flight.
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VcsSettings {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    pub clone_dir: PathBuf,
    pub kubeconfig_dir: PathBuf,
    pub helm_download_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthSettings {
    pub enabled: bool,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmSettings {
    pub version: semver::Version,
    /// Directory the helm binary is looked up in and installed to.
    pub bin_path: PathBuf,
    pub auto_install: bool,
    /// Lines of context around diff hunks; negative leaves helm's default.
    pub diff_context: i64,
    pub apply_dry_run: bool,
}

/// Service principal used for AKS credentials. Unset fields fall back to
/// the Azure CLI login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureSettings {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingSettings {
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let work = std::env::temp_dir().join("sparrow");
        let bin_path = dirs::data_local_dir()
            .unwrap_or_else(|| work.clone())
            .join("sparrow")
            .join("bin");

        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            path_prefix: String::new(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            sparrowfile_name: "sparrowfile.yaml".to_string(),
            vcs: VcsSettings::default(),
            workspace: WorkspaceSettings {
                clone_dir: work.join("repos"),
                kubeconfig_dir: work.join("kubeconfigs"),
                helm_download_dir: work.join("downloads"),
            },
            basic_auth: BasicAuthSettings {
                enabled: false,
                username: "sparrow".to_string(),
                password: "worraps".to_string(),
            },
            helm: HelmSettings {
                version: semver::Version::new(3, 15, 0),
                bin_path,
                auto_install: true,
                diff_context: -1,
                apply_dry_run: false,
            },
            azure: AzureSettings::default(),
            locking: LockingSettings { timeout_secs: 600 },
            shutdown_grace_secs: 300,
        }
    }
}

impl Settings {
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("sparrow").join("config.yaml"))
    }

    /// Checks the loaded values the service cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.vcs.base_url.trim().is_empty() {
            bail!("vcs.base_url is required (set it in the config file or {ENV_PREFIX}VCS__BASE_URL)");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            bail!("log_format must be `json` or `pretty`, got `{}`", self.log_format);
        }
        if self.basic_auth.enabled && self.basic_auth.password.is_empty() {
            bail!("basic_auth is enabled without a password");
        }
        Ok(())
    }

    /// Routes are mounted under this path; always empty or `/`-prefixed
    /// without a trailing slash.
    pub fn route_prefix(&self) -> String {
        let trimmed = self.path_prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

/// Defaults, then the YAML file, then `SPARROW_*` variables (`__` nests),
/// then `AZURE_*` variables onto the `azure` section.
pub fn figment(file: &Path) -> Figment {
    Figment::from(Serialized::defaults(Settings::default()))
        .merge(Yaml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(
            Env::prefixed(AZURE_ENV_PREFIX)
                .only(&["subscription_id", "tenant_id", "client_id", "client_secret"])
                .map(|key| format!("azure.{key}").into()),
        )
}

/// Load settings from `path` or, when absent, the default config location.
/// An explicitly named file must exist; the default one is optional.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            path.to_path_buf()
        }
        None => Settings::default_path()?,
    };

    let settings: Settings = figment(&file)
        .extract()
        .with_context(|| format!("loading configuration from {}", file.display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn from_yaml(doc: &str) -> Settings {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Yaml::string(doc))
            .extract()
            .unwrap()
    }

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.http_addr, "0.0.0.0:8080");
        assert_eq!(settings.sparrowfile_name, "sparrowfile.yaml");
        assert_eq!(settings.helm.version, semver::Version::new(3, 15, 0));
        assert_eq!(settings.helm.diff_context, -1);
        assert!(!settings.basic_auth.enabled);
        assert_eq!(settings.basic_auth.username, "sparrow");
        assert_eq!(settings.shutdown_grace_secs, 300);
        assert!(settings.validate().is_err(), "base_url has no default");
    }

    #[test]
    fn yaml_overrides_nested_keys_only() {
        let settings = from_yaml(
            r#"
path_prefix: /sparrow/
vcs:
  base_url: https://gitlab.example.com
  token: glpat-test
helm:
  version: 3.14.2
  apply_dry_run: true
azure:
  subscription_id: sub-1
"#,
        );
        assert_eq!(settings.vcs.base_url, "https://gitlab.example.com");
        assert_eq!(settings.helm.version, semver::Version::new(3, 14, 2));
        assert!(settings.helm.apply_dry_run);
        assert!(settings.helm.auto_install);
        assert_eq!(settings.azure.subscription_id.as_deref(), Some("sub-1"));
        assert_eq!(settings.azure.tenant_id, None);
        assert_eq!(settings.route_prefix(), "/sparrow");
        settings.validate().unwrap();
    }

    #[test]
    fn route_prefix_normalisation() {
        let mut settings = Settings::default();
        assert_eq!(settings.route_prefix(), "");
        settings.path_prefix = "/".to_string();
        assert_eq!(settings.route_prefix(), "");
        settings.path_prefix = "hooks".to_string();
        assert_eq!(settings.route_prefix(), "/hooks");
    }

    #[test]
    fn rejects_unknown_log_format() {
        let settings = from_yaml("vcs:\n  base_url: https://gitlab.example.com\nlog_format: xml\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(load(Some(&dir.path().join("missing.yaml"))).is_err());

        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "http_addr: 127.0.0.1:9000\n").unwrap();
        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.http_addr, "127.0.0.1:9000");
    }
}
