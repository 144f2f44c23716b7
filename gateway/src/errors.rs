use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use farm_client::dispatcher::UnsupportedVersion;
use farm_client::{ClientError, RegistryError};
use serde::Serialize;
use session::SessionError;
use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Client(e) => match e {
                ClientError::ChallengeFailed | ClientError::NotAccessible(_) => StatusCode::FORBIDDEN,
                ClientError::AllServersFailed(_) | ClientError::NotAuthenticated => {
                    StatusCode::UNAUTHORIZED
                }
                ClientError::UnknownServer(_) => StatusCode::NOT_FOUND,
                ClientError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                ClientError::Transport { .. }
                | ClientError::Timeout { .. }
                | ClientError::Status { .. }
                | ClientError::InvalidBody { .. }
                | ClientError::SchemaViolation { .. }
                | ClientError::Internal { .. } => StatusCode::BAD_GATEWAY,
            },
            GatewayError::UnsupportedVersion(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Session(_)
            | GatewayError::Registry(_)
            | GatewayError::HttpClient(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = Json(ErrorBody {
            success: false,
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}
