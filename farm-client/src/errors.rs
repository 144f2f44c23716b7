use http::StatusCode;
use thiserror::Error;

/// Result type alias for build-farm client operations
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors that can occur while talking to the build-farm servers.
///
/// Per-server variants render as `"<server>: <reason>"` so they can be shown
/// verbatim in an aggregated warning.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{server}: request failed: {reason}")]
    Transport { server: String, reason: String },

    #[error("{server}: request timed out")]
    Timeout { server: String },

    #[error("{server}: unexpected status {status}")]
    Status { server: String, status: StatusCode },

    #[error("{server}: malformed response body: {detail}")]
    InvalidBody { server: String, detail: String },

    /// The body parsed as JSON but does not have the expected shape.
    #[error("{server}: schema violation: {detail}")]
    SchemaViolation { server: String, detail: String },

    #[error("anti-automation challenge failed")]
    ChallengeFailed,

    #[error("login failed on every server: {0}")]
    AllServersFailed(String),

    #[error("server {0} is not accessible with the current session")]
    NotAccessible(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("not authenticated against any server")]
    NotAuthenticated,

    #[error(transparent)]
    InvalidPath(#[from] crate::dispatcher::InvalidPath),

    #[error("{server}: internal error: {reason}")]
    Internal { server: String, reason: String },
}

impl ClientError {
    /// Failures that block the user's action instead of degrading it.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            ClientError::ChallengeFailed
                | ClientError::AllServersFailed(_)
                | ClientError::NotAccessible(_)
        )
    }

    /// The server a per-server failure refers to.
    pub fn server(&self) -> Option<&str> {
        match self {
            ClientError::Transport { server, .. }
            | ClientError::Timeout { server }
            | ClientError::Status { server, .. }
            | ClientError::InvalidBody { server, .. }
            | ClientError::SchemaViolation { server, .. }
            | ClientError::Internal { server, .. } => Some(server),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_server() {
        let err = ClientError::Timeout {
            server: "Standard".into(),
        };
        assert_eq!(err.to_string(), "Standard: request timed out");
        assert_eq!(err.server(), Some("Standard"));

        let err = ClientError::Status {
            server: "Zen4".into(),
            status: StatusCode::UNAUTHORIZED,
        };
        assert_eq!(err.to_string(), "Zen4: unexpected status 401 Unauthorized");
    }

    #[test]
    fn test_hard_failures() {
        assert!(ClientError::ChallengeFailed.is_hard_failure());
        assert!(ClientError::AllServersFailed("x".into()).is_hard_failure());
        assert!(ClientError::NotAccessible("Zen4".into()).is_hard_failure());
        assert!(!ClientError::NotAuthenticated.is_hard_failure());
        assert!(
            !ClientError::SchemaViolation {
                server: "Zen4".into(),
                detail: "missing field `token`".into()
            }
            .is_hard_failure()
        );
        assert_eq!(ClientError::ChallengeFailed.server(), None);
    }
}
