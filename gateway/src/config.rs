use farm_client::{ChallengeConfig, RegistryError, ServerConfig, ServerRegistry, UpstreamTimeouts};
use serde::Deserialize;
use session::{CookieSettings, DEFAULT_TTL};
use std::time::Duration;
use thiserror::Error;

/// Shortest accepted session signing secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Session secret must not be empty")]
    EmptySessionSecret,

    #[error("Session secret must be at least {MIN_SESSION_SECRET_LEN} bytes, got {0}")]
    ShortSessionSecret(usize),

    #[error("Session ttl cannot be 0")]
    ZeroSessionTtl,

    #[error("Challenge secret must not be empty")]
    EmptyChallengeSecret,

    #[error("Timeout cannot be 0: {0}")]
    ZeroTimeout(&'static str),

    #[error("Invalid server list: {0}")]
    Servers(#[from] RegistryError),
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the dashboard API
    pub listener: Listener,
    /// Listener for health and readiness probes
    pub admin_listener: Listener,
    pub session: SessionConfig,
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub upstream: UpstreamTimeouts,
    /// Replaces the compiled-in server list when set
    #[serde(default)]
    pub servers: Option<Vec<ServerConfig>>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.session.validate()?;

        if self.challenge.secret.is_empty() {
            return Err(ValidationError::EmptyChallengeSecret);
        }
        if self.upstream.http_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout("http_timeout_secs"));
        }
        if self.upstream.fanout_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout("fanout_timeout_secs"));
        }

        self.registry()?;
        Ok(())
    }

    /// The configured servers, or the compiled-in registry when none are set.
    pub fn registry(&self) -> Result<ServerRegistry, RegistryError> {
        match &self.servers {
            Some(servers) => ServerRegistry::new(servers.clone()),
            None => ServerRegistry::builtin(),
        }
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Key material for the session cookie cipher
    pub secret: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    #[serde(default = "default_secure_cookie")]
    pub secure_cookie: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.secret.len() {
            0 => return Err(ValidationError::EmptySessionSecret),
            len if len < MIN_SESSION_SECRET_LEN => {
                return Err(ValidationError::ShortSessionSecret(len));
            }
            _ => {}
        }
        if self.ttl_minutes == 0 {
            return Err(ValidationError::ZeroSessionTtl);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }

    pub fn cookie_settings(&self) -> CookieSettings {
        CookieSettings {
            name: self.cookie_name.clone(),
            secure: self.secure_cookie,
        }
    }
}

fn default_cookie_name() -> String {
    CookieSettings::default().name
}

fn default_ttl_minutes() -> u64 {
    DEFAULT_TTL.as_secs() / 60
}

fn default_secure_cookie() -> bool {
    true
}
