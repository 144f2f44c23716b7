use http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA, USER_AGENT};
use http::Method;
use shared::client_identity::{ClientIdentity, X_FORWARDED_FOR};
use shared::histogram;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use url::Url;

use crate::codec::RawResponse;
use crate::config::UpstreamTimeouts;
use crate::errors::{ClientError, Result};
use crate::metrics_defs::DISPATCH_DURATION;
use crate::registry::ServerDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1,
    V2,
    V3,
}

impl ApiVersion {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
            ApiVersion::V3 => "v3",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unsupported api version: {0}")]
pub struct UnsupportedVersion(pub String);

impl FromStr for ApiVersion {
    type Err = UnsupportedVersion;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "v1" => Ok(ApiVersion::V1),
            "v2" => Ok(ApiVersion::V2),
            "v3" => Ok(ApiVersion::V3),
            other => Err(UnsupportedVersion(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid api path: {0}")]
pub struct InvalidPath(pub String);

/// Checks that `path` stays below the version segment: no `.` or `..`
/// segments and no backslashes.
pub fn check_path(path: &str) -> std::result::Result<(), InvalidPath> {
    let escapes = path
        .split('/')
        .any(|segment| segment == "." || segment == ".." || segment.contains('\\'));
    if escapes {
        return Err(InvalidPath(path.to_string()));
    }
    Ok(())
}

/// A call against one server's versioned API, independent of the target.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub version: ApiVersion,
    /// Path below the version segment, e.g. `packages/search`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, version: ApiVersion, path: impl Into<String>) -> Self {
        Self {
            method,
            version,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(version: ApiVersion, path: impl Into<String>) -> Self {
        Self::new(Method::GET, version, path)
    }

    pub fn post(version: ApiVersion, path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, version, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// `<server.url>/<version>/<path>`, with every path segment
    /// percent-encoded so `?`, `#` and `%` cannot leave the path.
    pub fn url_for(&self, server: &ServerDescriptor) -> std::result::Result<Url, InvalidPath> {
        check_path(&self.path)?;

        let mut url = server.url.clone();
        url.path_segments_mut()
            .map_err(|_| InvalidPath(server.url.to_string()))?
            .pop_if_empty()
            .push(self.version.as_str())
            .extend(self.path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

/// Builds the HTTP client shared by all dispatchers of a process.
pub fn build_http_client(timeouts: &UpstreamTimeouts) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeouts.http_timeout_secs))
        .build()
}

/// Sends single requests to a build-farm server on behalf of one client.
///
/// One attempt per call: no retries, no caching. Any transport failure or
/// non-2xx status becomes an error naming the server.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    client: reqwest::Client,
    identity: ClientIdentity,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, identity: ClientIdentity) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub async fn send(
        &self,
        server: &ServerDescriptor,
        token: &str,
        request: &ApiRequest,
    ) -> Result<RawResponse> {
        let url = request.url_for(server)?;
        tracing::debug!(server = %server.name, method = %request.method, %url, "dispatching");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.identity.user_agent)
            .header(X_FORWARDED_FOR, &self.identity.forwarded_for)
            .header(CACHE_CONTROL, "no-cache, no-store, max-age=0")
            .header(PRAGMA, "no-cache");

        if !token.is_empty() {
            builder = builder.bearer_auth(token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&server.name, e))?;
        histogram!(DISPATCH_DURATION, "server" => server.name.clone())
            .record(started.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                server: server.name.clone(),
                status,
            });
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&server.name, e))?;

        Ok(RawResponse {
            server: server.name.clone(),
            status,
            headers,
            body,
        })
    }
}

fn transport_error(server: &str, error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout {
            server: server.to_string(),
        }
    } else {
        ClientError::Transport {
            server: server.to_string(),
            reason: error.without_url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::descriptor;
    use http::StatusCode;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher() -> Dispatcher {
        let client = build_http_client(&UpstreamTimeouts::default()).unwrap();
        Dispatcher::new(
            client,
            ClientIdentity {
                forwarded_for: "203.0.113.9".into(),
                user_agent: "Mozilla/5.0 (test)".into(),
            },
        )
    }

    #[test]
    fn test_api_version_parsing() {
        assert_eq!("v2".parse::<ApiVersion>().unwrap(), ApiVersion::V2);
        assert_eq!(ApiVersion::V3.to_string(), "v3");
        assert_eq!(
            "v9".parse::<ApiVersion>().unwrap_err(),
            UnsupportedVersion("v9".into())
        );
    }

    #[test]
    fn test_url_building() {
        let server = descriptor("Zen4", "http://zen4.example.com/api/", true);
        let request = ApiRequest::get(ApiVersion::V1, "/logs/x86_64/foo.log");
        assert_eq!(
            request.url_for(&server).unwrap().as_str(),
            "http://zen4.example.com/api/v1/logs/x86_64/foo.log"
        );

        let server = descriptor("Zen4", "http://zen4.example.com", true);
        let request = ApiRequest::get(ApiVersion::V3, "packages");
        assert_eq!(
            request.url_for(&server).unwrap().as_str(),
            "http://zen4.example.com/v3/packages"
        );
    }

    #[test]
    fn test_url_stays_below_version() {
        let server = descriptor("Zen4", "http://zen4.example.com/api/", true);

        for path in ["../../admin/users", "packages/../../admin", "./status", "a\\..\\b"] {
            assert_eq!(
                ApiRequest::get(ApiVersion::V1, path).url_for(&server),
                Err(InvalidPath(path.to_string())),
                "{path}"
            );
        }

        let request = ApiRequest::get(ApiVersion::V1, "admin/users?role=all#frag");
        assert_eq!(
            request.url_for(&server).unwrap().as_str(),
            "http://zen4.example.com/api/v1/admin/users%3Frole=all%23frag"
        );

        let request = ApiRequest::get(ApiVersion::V1, "..%2F..%2Fadmin");
        assert_eq!(
            request.url_for(&server).unwrap().as_str(),
            "http://zen4.example.com/api/v1/..%252F..%252Fadmin"
        );
    }

    #[tokio::test]
    async fn test_escaping_path_is_not_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let server = descriptor("Zen4", &format!("{}/api/", mock_server.uri()), true);
        let err = dispatcher()
            .send(
                &server,
                "tok",
                &ApiRequest::get(ApiVersion::V1, "../../admin/users?role=all"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_send_with_token_and_identity() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/packages/rebuild"))
            .and(query_param("march", "x86-64-v4"))
            .and(header("authorization", "Bearer secret-token"))
            .and(header("x-forwarded-for", "203.0.113.9"))
            .and(header("user-agent", "Mozilla/5.0 (test)"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"pkgbase": "linux"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"queued": true}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let server = descriptor("Zen4", &mock_server.uri(), true);
        let request = ApiRequest::post(
            ApiVersion::V2,
            "packages/rebuild",
            serde_json::json!({"pkgbase": "linux"}),
        )
        .with_query("march", "x86-64-v4");

        let response = dispatcher()
            .send(&server, "secret-token", &request)
            .await
            .unwrap();
        assert_eq!(response.server, "Zen4");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_ref(), br#"{"queued": true}"#);

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(
            requests[0].headers.get("cache-control").unwrap(),
            "no-cache, no-store, max-age=0"
        );
        assert_eq!(requests[0].headers.get("pragma").unwrap(), "no-cache");
    }

    #[tokio::test]
    async fn test_no_authorization_header_without_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let server = descriptor("Zen4", &mock_server.uri(), true);
        dispatcher()
            .send(&server, "", &ApiRequest::get(ApiVersion::V1, "status"))
            .await
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let server = descriptor("Standard", &mock_server.uri(), true);
        let err = dispatcher()
            .send(&server, "t", &ApiRequest::get(ApiVersion::V1, "anything"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Status { ref server, status } if server == "Standard" && status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(client, ClientIdentity::default());
        let server = descriptor("Zen4", &mock_server.uri(), true);

        let err = dispatcher
            .send(&server, "", &ApiRequest::get(ApiVersion::V1, "slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { ref server } if server == "Zen4"));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        // Nothing listens on the discard port of localhost in the test environment
        let server = descriptor("Zen4", "http://127.0.0.1:9", true);
        let err = dispatcher()
            .send(&server, "", &ApiRequest::get(ApiVersion::V1, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport { ref server, .. } if server == "Zen4"));
    }
}
