//! AKS admin credentials through the Azure Resource Manager REST API.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AksCredentialSource, ClusterError};
use crate::config::AzureSettings;

pub const NO_CREDENTIALS: &str = "Failed to authenticate to Azure. No credentials found.";
pub const INSUFFICIENT_PERMISSIONS: &str =
    "Insufficient permissions on Azure. Did you just add new privileges?";

const LOGIN_URL: &str = "https://login.microsoftonline.com";
const MANAGEMENT_URL: &str = "https://management.azure.com";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const CONTAINER_SERVICE_API_VERSION: &str = "2024-02-01";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CredentialResults {
    #[serde(default)]
    kubeconfigs: Vec<CredentialResult>,
}

#[derive(Debug, Deserialize)]
struct CredentialResult {
    /// Base64-encoded kubeconfig document.
    value: String,
}

pub struct ArmCredentials {
    http: Client,
    settings: AzureSettings,
}

impl ArmCredentials {
    pub fn new(http: Client, settings: AzureSettings) -> Self {
        Self { http, settings }
    }

    async fn access_token(&self) -> Result<String, ClusterError> {
        match (
            &self.settings.tenant_id,
            &self.settings.client_id,
            &self.settings.client_secret,
        ) {
            (Some(tenant), Some(client_id), Some(secret)) => {
                self.client_credentials_token(tenant, client_id, secret).await
            }
            _ => cli_token().await,
        }
    }

    async fn client_credentials_token(
        &self,
        tenant: &str,
        client_id: &str,
        secret: &str,
    ) -> Result<String, ClusterError> {
        let url = format!("{LOGIN_URL}/{tenant}/oauth2/v2.0/token");
        let resp = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", secret),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| no_credentials("token request failed", &e))?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "azure token request rejected");
            return Err(ClusterError::Authentication(NO_CREDENTIALS.to_string()));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| no_credentials("token response unreadable", &e))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl AksCredentialSource for ArmCredentials {
    async fn admin_kubeconfig(
        &self,
        resource_group: &str,
        cluster_name: &str,
    ) -> Result<String, ClusterError> {
        let subscription = self
            .settings
            .subscription_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                warn!("azure subscription id is not configured");
                ClusterError::Authentication(NO_CREDENTIALS.to_string())
            })?;

        let token = self.access_token().await?;
        let url = credentials_url(subscription, resource_group, cluster_name)?;
        debug!(resource_group, cluster_name, "requesting cluster admin credentials");

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "azure management request failed");
                ClusterError::Authentication(INSUFFICIENT_PERMISSIONS.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!(%status, resource_group, cluster_name, "listClusterAdminCredential rejected");
            return Err(classify_status(status));
        }

        let results: CredentialResults = resp.json().await.map_err(|e| {
            warn!(error = %e, "unreadable credential response");
            ClusterError::Authentication(INSUFFICIENT_PERMISSIONS.to_string())
        })?;
        decode_first_kubeconfig(results)
    }
}

/// `listClusterAdminCredential` for one cluster, each name percent-encoded
/// as a single path segment.
fn credentials_url(
    subscription: &str,
    resource_group: &str,
    cluster_name: &str,
) -> Result<Url, ClusterError> {
    let invalid = |reason: String| ClusterError::InvalidProviderConfig {
        cluster: cluster_name.to_string(),
        reason,
    };
    let mut url = Url::parse(MANAGEMENT_URL).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid(format!("{MANAGEMENT_URL} cannot carry a path")))?
        .pop_if_empty()
        .extend([
            "subscriptions",
            subscription,
            "resourceGroups",
            resource_group,
            "providers",
            "Microsoft.ContainerService",
            "managedClusters",
            cluster_name,
            "listClusterAdminCredential",
        ]);
    url.query_pairs_mut()
        .append_pair("api-version", CONTAINER_SERVICE_API_VERSION);
    Ok(url)
}

/// `az account get-access-token` for hosts logged in through the Azure CLI or
/// a managed identity.
async fn cli_token() -> Result<String, ClusterError> {
    let output = tokio::process::Command::new("az")
        .args([
            "account",
            "get-access-token",
            "--resource",
            "https://management.azure.com/",
            "--output",
            "json",
        ])
        .output()
        .await
        .map_err(|e| no_credentials("az cli unavailable", &e))?;

    if !output.status.success() {
        warn!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "az account get-access-token failed"
        );
        return Err(ClusterError::Authentication(NO_CREDENTIALS.to_string()));
    }

    let token: CliToken = serde_json::from_slice(&output.stdout)
        .map_err(|e| no_credentials("az cli output unreadable", &e))?;
    Ok(token.access_token)
}

fn no_credentials(what: &str, error: &dyn std::fmt::Display) -> ClusterError {
    warn!(error = %error, "{what}");
    ClusterError::Authentication(NO_CREDENTIALS.to_string())
}

fn classify_status(status: StatusCode) -> ClusterError {
    let message = if status == StatusCode::UNAUTHORIZED {
        NO_CREDENTIALS
    } else {
        INSUFFICIENT_PERMISSIONS
    };
    ClusterError::Authentication(message.to_string())
}

fn decode_first_kubeconfig(results: CredentialResults) -> Result<String, ClusterError> {
    let encoded = results
        .kubeconfigs
        .into_iter()
        .next()
        .ok_or_else(|| ClusterError::Authentication(INSUFFICIENT_PERMISSIONS.to_string()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.value.trim())
        .map_err(|e| {
            warn!(error = %e, "kubeconfig is not valid base64");
            ClusterError::Authentication(INSUFFICIENT_PERMISSIONS.to_string())
        })?;

    String::from_utf8(bytes).map_err(|e| {
        warn!(error = %e, "kubeconfig is not valid utf-8");
        ClusterError::Authentication(INSUFFICIENT_PERMISSIONS.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_means_no_credentials() {
        let err = classify_status(StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), NO_CREDENTIALS);
    }

    #[test]
    fn other_failures_mean_missing_permissions() {
        for status in [StatusCode::FORBIDDEN, StatusCode::NOT_FOUND, StatusCode::BAD_GATEWAY] {
            let err = classify_status(status);
            assert!(matches!(err, ClusterError::Authentication(_)));
            assert_eq!(err.to_string(), INSUFFICIENT_PERMISSIONS);
        }
    }

    #[test]
    fn credentials_url_keeps_names_inside_their_segment() {
        let url = credentials_url("sub-1", "dev-rg", "dev-aks").unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/dev-rg/providers/Microsoft.ContainerService/managedClusters/dev-aks/listClusterAdminCredential?api-version=2024-02-01"
        );

        let url = credentials_url("sub-1", "a/b", "x?y#z").unwrap();
        assert!(url.path().contains("/resourceGroups/a%2Fb/"), "{url}");
        assert!(url.path().ends_with("/managedClusters/x%3Fy%23z/listClusterAdminCredential"), "{url}");
        assert_eq!(url.query(), Some("api-version=2024-02-01"));
    }

    #[test]
    fn decodes_first_kubeconfig() {
        let body = r#"{"kubeconfigs":[
            {"name":"clusterAdmin","value":"YXBpVmVyc2lvbjogdjEK"},
            {"name":"other","value":"aWdub3JlZAo="}
        ]}"#;
        let results: CredentialResults = serde_json::from_str(body).unwrap();
        assert_eq!(decode_first_kubeconfig(results).unwrap(), "apiVersion: v1\n");
    }

    #[test]
    fn empty_credential_list_is_an_authentication_error() {
        let results: CredentialResults = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            decode_first_kubeconfig(results),
            Err(ClusterError::Authentication(_))
        ));
    }
}
