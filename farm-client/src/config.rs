use serde::Deserialize;
use url::Url;

/// One build-farm server as written in configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Unique identifier, shown to users
    pub name: String,
    /// Base endpoint; versioned paths are appended to it
    pub url: Url,
    #[serde(default)]
    pub description: String,
    /// Exactly one server must be the default
    #[serde(default)]
    pub default: bool,
}

/// Timeouts applied to calls against the build-farm servers.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamTimeouts {
    /// Bound on a single request/response cycle.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Bound on a whole fan-out; servers still pending after it are reported
    /// as timed out.
    #[serde(default = "default_fanout_timeout_secs")]
    pub fanout_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_fanout_timeout_secs() -> u64 {
    45
}

pub const DEFAULT_CHALLENGE_ENDPOINT: &str =
    "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Anti-automation challenge verification settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ChallengeConfig {
    /// Shared secret sent along with every verification
    pub secret: String,
    #[serde(default = "default_challenge_endpoint")]
    pub endpoint: Url,
}

fn default_challenge_endpoint() -> Url {
    Url::parse(DEFAULT_CHALLENGE_ENDPOINT).expect("valid default challenge endpoint")
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            fanout_timeout_secs: default_fanout_timeout_secs(),
        }
    }
}
