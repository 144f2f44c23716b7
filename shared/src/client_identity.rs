//! Identity of the browser client on whose behalf an upstream call is made.
//!
//! Values are copied verbatim from the inbound request and forwarded to the
//! build-farm servers for auditing. Nothing here is computed or validated.

use http::HeaderMap;
use http::header::{HeaderName, USER_AGENT};

pub const FALLBACK_USER_AGENT: &str = "BuilderDashboardProxyServer/1.0.0";

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Best-effort client address, empty when the caller sent none.
    pub forwarded_for: String,
    pub user_agent: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            forwarded_for: String::new(),
            user_agent: FALLBACK_USER_AGENT.to_string(),
        }
    }
}

impl ClientIdentity {
    /// Prefers `X-Forwarded-For`, then `X-Real-IP`. The user agent falls back
    /// to [`FALLBACK_USER_AGENT`].
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header_str = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let forwarded_for = header_str(&X_FORWARDED_FOR)
            .or_else(|| header_str(&X_REAL_IP))
            .unwrap_or_default();
        let user_agent =
            header_str(&USER_AGENT).unwrap_or_else(|| FALLBACK_USER_AGENT.to_string());

        Self {
            forwarded_for,
            user_agent,
        }
    }

    /// The originating client: first hop of `forwarded_for`.
    pub fn client_ip(&self) -> &str {
        self.forwarded_for
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(&X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(&X_REAL_IP, HeaderValue::from_static("10.0.0.1"));
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));

        let identity = ClientIdentity::from_headers(&headers);
        assert_eq!(identity.forwarded_for, "203.0.113.7, 10.0.0.1");
        assert_eq!(identity.user_agent, "Mozilla/5.0");
        assert_eq!(identity.client_ip(), "203.0.113.7");
    }

    #[test]
    fn test_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(&X_REAL_IP, HeaderValue::from_static("198.51.100.2"));

        let identity = ClientIdentity::from_headers(&headers);
        assert_eq!(identity.forwarded_for, "198.51.100.2");
        assert_eq!(identity.client_ip(), "198.51.100.2");
        assert_eq!(identity.user_agent, FALLBACK_USER_AGENT);
    }

    #[test]
    fn test_empty_headers() {
        let identity = ClientIdentity::from_headers(&HeaderMap::new());
        assert_eq!(identity, ClientIdentity::default());
        assert_eq!(identity.client_ip(), "");
    }
}
