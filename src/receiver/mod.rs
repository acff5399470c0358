//! Webhook receivers: validate provider payloads and canonicalize them into
//! `PullRequestEvent`s.

pub mod gitlab;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;
use thiserror::Error;

use crate::event::{PullRequestEvent, StatusTarget};

#[derive(Debug, Error)]
#[error("invalid {stage} payload: {source}")]
pub struct SchemaError {
    pub stage: &'static str,
    #[source]
    pub source: serde_json::Error,
}

pub trait Receiver: Send + Sync {
    /// `Ok(None)` for well-formed events nobody needs to act on.
    fn canonicalize(&self, payload: &Value) -> Result<Option<PullRequestEvent>, SchemaError>;

    /// Best-effort location for a failure status when `canonicalize` rejected
    /// the payload.
    fn failure_target(&self, payload: &Value) -> Option<StatusTarget>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    GitLab,
}

impl ProviderKind {
    /// Provider named by the configured source-control base URL.
    pub fn from_base_url(base_url: &str) -> Option<Self> {
        let lower = base_url.to_lowercase();
        if lower.contains("gitlab") {
            Some(ProviderKind::GitLab)
        } else {
            None
        }
    }

    /// Provider identified by the delivery's event header.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        if headers.contains_key(gitlab::EVENT_HEADER) {
            Some(ProviderKind::GitLab)
        } else {
            None
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::GitLab => write!(f, "gitlab"),
        }
    }
}

#[derive(Clone)]
pub struct ReceiverRegistry {
    receivers: HashMap<ProviderKind, Arc<dyn Receiver>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        let mut receivers: HashMap<ProviderKind, Arc<dyn Receiver>> = HashMap::new();
        receivers.insert(ProviderKind::GitLab, Arc::new(gitlab::GitLabReceiver));
        Self { receivers }
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Receiver>> {
        self.receivers.get(&kind).cloned()
    }
}

impl Default for ReceiverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn provider_from_base_url() {
        assert_eq!(
            ProviderKind::from_base_url("https://GitLab.example.com"),
            Some(ProviderKind::GitLab)
        );
        assert_eq!(ProviderKind::from_base_url("https://github.com"), None);
    }

    #[test]
    fn provider_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(ProviderKind::from_headers(&headers), None);
        headers.insert("x-gitlab-event", HeaderValue::from_static("Note Hook"));
        assert_eq!(ProviderKind::from_headers(&headers), Some(ProviderKind::GitLab));
    }

    #[test]
    fn registry_has_gitlab() {
        assert!(ReceiverRegistry::new().get(ProviderKind::GitLab).is_some());
    }
}
