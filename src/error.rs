use std::fmt;

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::command::CommandParseError;
use crate::lock::LockError;
use crate::receiver::SchemaError;
use crate::release::ReleaseError;
use crate::sparrowfile::SparrowfileError;
use crate::vcs::VcsError;

/// Failure classes the event boundary reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaValidation,
    CommandParse,
    ClusterNotDefined,
    ConfigurationNotFound,
    Authentication,
    SystemExecution,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::CommandParse => "command_parse",
            ErrorKind::ClusterNotDefined => "cluster_not_defined",
            ErrorKind::ConfigurationNotFound => "configuration_not_found",
            ErrorKind::Authentication => "authentication",
            ErrorKind::SystemExecution => "system_execution",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SparrowError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Command(#[from] CommandParseError),

    #[error(transparent)]
    Sparrowfile(#[from] SparrowfileError),

    #[error("environment `{environment}` is not configured for chart `{chart}`")]
    UnknownEnvironment { chart: String, environment: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SparrowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SparrowError::Schema(_) => ErrorKind::SchemaValidation,
            SparrowError::Command(_) => ErrorKind::CommandParse,
            SparrowError::Sparrowfile(SparrowfileError::ClusterNotDefined(_)) => {
                ErrorKind::ClusterNotDefined
            }
            SparrowError::UnknownEnvironment { .. } => ErrorKind::ConfigurationNotFound,
            SparrowError::Cluster(
                ClusterError::Authentication(_) | ClusterError::InvalidProviderConfig { .. },
            ) => ErrorKind::Authentication,
            SparrowError::Sparrowfile(_)
            | SparrowError::Cluster(_)
            | SparrowError::Release(_)
            | SparrowError::Vcs(_)
            | SparrowError::Lock(_) => ErrorKind::SystemExecution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn classification() {
        assert_eq!(
            SparrowError::from(SparrowfileError::ClusterNotDefined("c".into())).kind(),
            ErrorKind::ClusterNotDefined
        );
        assert_eq!(
            SparrowError::from(SparrowfileError::NotFound(PathBuf::from("x"))).kind(),
            ErrorKind::SystemExecution
        );
        assert_eq!(
            SparrowError::from(ClusterError::Authentication("denied".into())).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            SparrowError::from(LockError::Timeout {
                key: "k".into(),
                waited: Duration::from_secs(1)
            })
            .kind(),
            ErrorKind::SystemExecution
        );
        assert_eq!(
            SparrowError::from(CommandParseError::MissingPrefix).kind(),
            ErrorKind::CommandParse
        );
        assert_eq!(ErrorKind::Authentication.to_string(), "authentication");
    }
}
