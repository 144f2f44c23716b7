use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::ChallengeConfig;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("no challenge token supplied")]
    MissingToken,

    #[error("challenge rejected: {}", .0.join(", "))]
    Rejected(Vec<String>),

    #[error("challenge verification unavailable: {0}")]
    Unavailable(String),
}

/// Verifies the client-supplied anti-automation token before any login.
#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    async fn verify(&self, challenge_token: &str, remote_ip: &str) -> Result<(), ChallengeError>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    remoteip: &'a str,
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

#[derive(Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verifies tokens against a siteverify-style HTTP endpoint.
pub struct HttpChallengeVerifier {
    client: reqwest::Client,
    endpoint: Url,
    secret: String,
}

impl HttpChallengeVerifier {
    pub fn new(client: reqwest::Client, config: &ChallengeConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            secret: config.secret.clone(),
        }
    }
}

#[async_trait]
impl ChallengeVerifier for HttpChallengeVerifier {
    async fn verify(&self, challenge_token: &str, remote_ip: &str) -> Result<(), ChallengeError> {
        if challenge_token.is_empty() {
            return Err(ChallengeError::MissingToken);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&VerifyRequest {
                secret: &self.secret,
                response: challenge_token,
                remoteip: remote_ip,
            })
            .send()
            .await
            .map_err(|e| ChallengeError::Unavailable(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(ChallengeError::Unavailable(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let verdict = response
            .json::<VerifyResponse>()
            .await
            .map_err(|e| ChallengeError::Unavailable(e.without_url().to_string()))?;

        match verdict.success {
            true => Ok(()),
            false => Err(ChallengeError::Rejected(verdict.error_codes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier(mock_server: &MockServer) -> HttpChallengeVerifier {
        let config = ChallengeConfig {
            secret: "shared-secret".into(),
            endpoint: Url::parse(&format!("{}/siteverify", mock_server.uri())).unwrap(),
        };
        HttpChallengeVerifier::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_successful_verification() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .and(body_json(serde_json::json!({
                "secret": "shared-secret",
                "response": "client-token",
                "remoteip": "203.0.113.1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success": true}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        verifier(&mock_server)
            .verify("client-token", "203.0.113.1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success": false, "error-codes": ["invalid-input-response"]}"#,
            ))
            .mount(&mock_server)
            .await;

        let err = verifier(&mock_server).verify("bad", "").await.unwrap_err();
        assert!(matches!(err, ChallengeError::Rejected(ref codes) if codes == &["invalid-input-response"]));
        assert_eq!(err.to_string(), "challenge rejected: invalid-input-response");
    }

    #[tokio::test]
    async fn test_missing_token_skips_network() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success": true}"#))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = verifier(&mock_server).verify("", "").await.unwrap_err();
        assert!(matches!(err, ChallengeError::MissingToken));
    }

    #[tokio::test]
    async fn test_endpoint_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let err = verifier(&mock_server).verify("t", "").await.unwrap_err();
        assert!(matches!(err, ChallengeError::Unavailable(ref msg) if msg.contains("503")));
    }
}
