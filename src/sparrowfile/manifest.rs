//! Chart manifest (`Chart.yaml`) metadata used to back-fill configurations.

use std::path::Path;

use serde::Deserialize;

use super::SparrowfileError;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: Option<String>,
    release_name: Option<String>,
    namespace: Option<String>,
}

/// Release metadata declared by a chart's own manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartManifest {
    pub release_name: String,
    pub namespace: String,
}

impl ChartManifest {
    pub fn load(chart_dir: &Path) -> Result<Self, SparrowfileError> {
        let path = chart_dir.join(crate::release::charts::CHART_MANIFEST);
        let content = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SparrowfileError::ManifestNotFound(path.clone())
            } else {
                SparrowfileError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        let raw: RawManifest = serde_yaml::from_str(&content).map_err(|source| {
            SparrowfileError::Parse {
                path: path.clone(),
                source,
            }
        })?;

        let release_name = raw
            .release_name
            .or(raw.name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SparrowfileError::MissingReleaseName(path.clone()))?;

        Ok(Self {
            release_name,
            namespace: raw
                .namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        })
    }
}
