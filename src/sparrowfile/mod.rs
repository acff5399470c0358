//! Sparrowfile: the repository-local document mapping chart paths to
//! environments and clusters.
//!
//! ```yaml
//! clusters:
//!   - name: dev-cluster
//!     provider: azure
//!     providerConfig:
//!       clusterName: dev-aks
//!       resourceGroup: dev-rg
//! chartConfigurations:
//!   - path: charts/api
//!     environments:
//!       - name: dev
//!         cluster: dev-cluster
//!         valuesFiles: [values-dev.yaml]
//! ```

pub mod manifest;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{AzureCluster, Cluster, LocalCluster, ProviderConfig};
use manifest::ChartManifest;

#[derive(Debug, Error)]
pub enum SparrowfileError {
    #[error("could not find the sparrowfile at {0}")]
    NotFound(PathBuf),

    #[error("could not find the chart manifest at {0}")]
    ManifestNotFound(PathBuf),

    #[error("cluster `{0}` is not defined")]
    ClusterNotDefined(String),

    #[error("cluster `{0}` is declared more than once")]
    DuplicateCluster(String),

    #[error("cluster `{cluster}` has unknown provider `{provider}` (expected `local` or `azure`)")]
    UnknownProvider { cluster: String, provider: String },

    #[error("chart manifest {0} declares neither `releaseName` nor `name`")]
    MissingReleaseName(PathBuf),

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// Raw document shape. Provider-specific keys are optional here and validated
// when a cluster is authenticated against.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSparrowfile {
    #[serde(default)]
    clusters: Vec<RawCluster>,
    #[serde(default)]
    chart_configurations: Vec<RawChartConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCluster {
    name: String,
    provider: String,
    #[serde(default)]
    provider_config: RawProviderConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProviderConfig {
    kubeconfig: Option<String>,
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    resource_group: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChartConfiguration {
    path: String,
    #[serde(default)]
    environments: Vec<RawEnvironment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvironment {
    name: String,
    cluster: String,
    #[serde(default)]
    values_files: Vec<String>,
    namespace: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChartEnvironment {
    pub name: String,
    /// Values files relative to the chart directory, applied in order.
    pub values_files: Vec<String>,
    pub cluster: Arc<Cluster>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChartConfiguration {
    pub path: String,
    pub release_name: Option<String>,
    pub environments: Vec<ChartEnvironment>,
}

impl ChartConfiguration {
    pub fn get_environment(&self, name: &str) -> Option<&ChartEnvironment> {
        self.environments.iter().find(|env| env.name == name)
    }

    pub fn environment_names(&self) -> Vec<&str> {
        self.environments.iter().map(|env| env.name.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Sparrowfile {
    pub clusters: Vec<Arc<Cluster>>,
    pub chart_configurations: Vec<ChartConfiguration>,
}

impl Sparrowfile {
    /// Load and link a sparrowfile from disk.
    pub fn load(path: &Path) -> Result<Self, SparrowfileError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SparrowfileError::NotFound(path.to_path_buf())
            } else {
                SparrowfileError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Self::parse(&content).map_err(|e| match e {
            SparrowfileError::Parse { source, .. } => SparrowfileError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse a sparrowfile document. Clusters are linked first; every
    /// environment must reference one of them by name.
    pub fn parse(content: &str) -> Result<Self, SparrowfileError> {
        let raw: Option<RawSparrowfile> =
            serde_yaml::from_str(content).map_err(|source| SparrowfileError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        let raw = raw.unwrap_or_default();

        let clusters = parse_clusters(raw.clusters)?;
        let chart_configurations = raw
            .chart_configurations
            .into_iter()
            .map(|chart| {
                let environments = chart
                    .environments
                    .into_iter()
                    .map(|env| {
                        let cluster = clusters
                            .iter()
                            .find(|c| c.name == env.cluster)
                            .cloned()
                            .ok_or(SparrowfileError::ClusterNotDefined(env.cluster))?;
                        Ok(ChartEnvironment {
                            name: env.name,
                            values_files: env.values_files,
                            cluster,
                            namespace: env.namespace,
                        })
                    })
                    .collect::<Result<Vec<_>, SparrowfileError>>()?;

                Ok(ChartConfiguration {
                    path: chart.path,
                    release_name: None,
                    environments,
                })
            })
            .collect::<Result<Vec<_>, SparrowfileError>>()?;

        Ok(Self {
            clusters,
            chart_configurations,
        })
    }

    #[cfg(test)]
    pub fn cluster(&self, name: &str) -> Option<&Arc<Cluster>> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Configuration for the chart at `chart_dir`, back-filled from the
    /// chart's own manifest.
    ///
    /// The declared path sharing the longest character prefix with the chart
    /// path (relative to `repo_root`) wins; the first declaration wins ties.
    /// `Ok(None)` means no declaration shares any prefix with the chart.
    pub fn resolve(
        &self,
        repo_root: &Path,
        chart_dir: &Path,
    ) -> Result<Option<ChartConfiguration>, SparrowfileError> {
        let chart_path = relative_chart_path(repo_root, chart_dir);

        let mut best: Option<(&ChartConfiguration, usize)> = None;
        for config in &self.chart_configurations {
            let length = prefix_match_length(config.path.trim_start_matches("./"), &chart_path);
            if best.map_or(true, |(_, top)| length > top) {
                best = Some((config, length));
            }
        }

        let config = match best {
            Some((config, length)) if length > 0 => config,
            _ => {
                info!(chart = %chart_path, "no chart configuration found");
                return Ok(None);
            }
        };
        debug!(chart = %chart_path, configuration = %config.path, "resolved chart configuration");

        let manifest = ChartManifest::load(chart_dir)?;
        let mut resolved = config.clone();
        resolved.release_name = Some(manifest.release_name);
        for env in &mut resolved.environments {
            if env.namespace.is_none() {
                env.namespace = Some(manifest.namespace.clone());
            }
        }

        Ok(Some(resolved))
    }
}

fn parse_clusters(raw: Vec<RawCluster>) -> Result<Vec<Arc<Cluster>>, SparrowfileError> {
    let mut seen = HashSet::new();
    let mut clusters = Vec::with_capacity(raw.len());

    for cluster in raw {
        if !seen.insert(cluster.name.clone()) {
            return Err(SparrowfileError::DuplicateCluster(cluster.name));
        }

        let provider = match cluster.provider.to_ascii_lowercase().as_str() {
            "local" => ProviderConfig::Local(LocalCluster {
                kubeconfig: cluster
                    .provider_config
                    .kubeconfig
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            }),
            "azure" => ProviderConfig::Azure(AzureCluster {
                cluster_name: cluster.provider_config.cluster_name,
                resource_group: cluster.provider_config.resource_group,
            }),
            _ => {
                return Err(SparrowfileError::UnknownProvider {
                    cluster: cluster.name,
                    provider: cluster.provider,
                })
            }
        };

        clusters.push(Arc::new(Cluster {
            name: cluster.name,
            provider,
        }));
    }

    Ok(clusters)
}

/// Chart directory relative to the repository root, `/`-separated.
pub fn relative_chart_path(repo_root: &Path, chart_dir: &Path) -> String {
    let relative = chart_dir.strip_prefix(repo_root).unwrap_or(chart_dir);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Number of leading characters two strings share.
pub fn prefix_match_length(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DOC: &str = r#"
clusters:
  - name: dev-cluster
    provider: azure
    providerConfig:
      clusterName: dev-aks
      resourceGroup: dev-rg
  - name: kind
    provider: local
    providerConfig:
      kubeconfig: /tmp/kind.yaml
chartConfigurations:
  - path: a/
    environments:
      - name: dev
        cluster: kind
        valuesFiles: [values-dev.yaml]
  - path: a/b/
    environments:
      - name: dev
        cluster: dev-cluster
        valuesFiles: [values-dev.yaml]
      - name: prod
        cluster: dev-cluster
        namespace: explicit
        valuesFiles: [values-prod.yaml, values-secret.yaml]
"#;

    fn write_chart(root: &Path, rel: &str, manifest: &str) -> PathBuf {
        let dir = root.join(rel);
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(dir.join("Chart.yaml"), manifest).unwrap();
        dir
    }

    #[test]
    fn parses_clusters_and_links_environments() {
        let file = Sparrowfile::parse(DOC).unwrap();
        assert_eq!(file.clusters.len(), 2);
        assert!(matches!(
            &file.cluster("dev-cluster").unwrap().provider,
            ProviderConfig::Azure(AzureCluster { cluster_name, resource_group })
                if cluster_name == "dev-aks" && resource_group == "dev-rg"
        ));
        assert!(matches!(
            &file.cluster("kind").unwrap().provider,
            ProviderConfig::Local(LocalCluster { kubeconfig: Some(_) })
        ));

        let nested = &file.chart_configurations[1];
        assert_eq!(nested.environment_names(), vec!["dev", "prod"]);
        assert_eq!(nested.environments[1].cluster.name, "dev-cluster");
        assert_eq!(
            nested.environments[1].values_files,
            vec!["values-prod.yaml", "values-secret.yaml"]
        );
    }

    #[test]
    fn unknown_cluster_reference_names_the_cluster() {
        let doc = r#"
clusters: []
chartConfigurations:
  - path: charts/api
    environments:
      - name: dev
        cluster: missing-cluster
"#;
        match Sparrowfile::parse(doc) {
            Err(SparrowfileError::ClusterNotDefined(name)) => assert_eq!(name, "missing-cluster"),
            other => panic!("expected ClusterNotDefined, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_cluster_names_are_rejected() {
        let doc = r#"
clusters:
  - name: kind
    provider: local
  - name: kind
    provider: local
"#;
        assert!(matches!(
            Sparrowfile::parse(doc),
            Err(SparrowfileError::DuplicateCluster(name)) if name == "kind"
        ));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let doc = "clusters:\n  - name: gke\n    provider: gcp\n";
        assert!(matches!(
            Sparrowfile::parse(doc),
            Err(SparrowfileError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn empty_document_has_no_configurations() {
        let file = Sparrowfile::parse("").unwrap();
        assert!(file.clusters.is_empty());
        assert!(file.chart_configurations.is_empty());
    }

    #[test]
    fn longest_prefix_wins() {
        let repo = TempDir::new().unwrap();
        let chart = write_chart(repo.path(), "a/b/c", "name: c\n");
        let file = Sparrowfile::parse(DOC).unwrap();

        let resolved = file.resolve(repo.path(), &chart).unwrap().unwrap();
        assert_eq!(resolved.path, "a/b/");
        assert_eq!(resolved.release_name.as_deref(), Some("c"));
    }

    #[test]
    fn first_declaration_wins_ties() {
        let doc = r#"
clusters:
  - name: kind
    provider: local
chartConfigurations:
  - path: charts/x
    environments: [{name: first, cluster: kind}]
  - path: charts/y
    environments: [{name: second, cluster: kind}]
"#;
        let repo = TempDir::new().unwrap();
        let chart = write_chart(repo.path(), "charts/api", "name: api\n");
        let file = Sparrowfile::parse(doc).unwrap();

        let resolved = file.resolve(repo.path(), &chart).unwrap().unwrap();
        assert_eq!(resolved.path, "charts/x");
    }

    #[test]
    fn namespace_backfill_keeps_explicit_values() {
        let repo = TempDir::new().unwrap();
        let chart = write_chart(repo.path(), "a/b/c", "name: c\nnamespace: team\n");
        let file = Sparrowfile::parse(DOC).unwrap();

        let resolved = file.resolve(repo.path(), &chart).unwrap().unwrap();
        assert_eq!(resolved.get_environment("dev").unwrap().namespace.as_deref(), Some("team"));
        assert_eq!(
            resolved.get_environment("prod").unwrap().namespace.as_deref(),
            Some("explicit")
        );
        // The loaded document itself is left untouched.
        assert!(file.chart_configurations[1].environments[0].namespace.is_none());
    }

    #[test]
    fn no_shared_prefix_resolves_to_none() {
        let repo = TempDir::new().unwrap();
        let chart = write_chart(repo.path(), "zeta", "name: zeta\n");
        let file = Sparrowfile::parse(DOC).unwrap();

        assert!(file.resolve(repo.path(), &chart).unwrap().is_none());
    }

    #[test]
    fn matched_chart_without_manifest_fails() {
        let repo = TempDir::new().unwrap();
        let chart = repo.path().join("a/b/c");
        fs::create_dir_all(&chart).unwrap();
        let file = Sparrowfile::parse(DOC).unwrap();

        assert!(matches!(
            file.resolve(repo.path(), &chart),
            Err(SparrowfileError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Sparrowfile::load(&dir.path().join("sparrowfile.yaml")),
            Err(SparrowfileError::NotFound(_))
        ));
    }

    #[test]
    fn prefix_length_is_character_based() {
        assert_eq!(prefix_match_length("charts/api", "charts/api2"), 10);
        assert_eq!(prefix_match_length("a/", "a/b/c"), 2);
        assert_eq!(prefix_match_length("x", "y"), 0);
    }
}
