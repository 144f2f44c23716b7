use gateway::config::{Config as GatewayConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.common.metrics.as_ref().is_some_and(|m| m.statsd_port == 0) {
            return Err(ValidationError::InvalidPort.into());
        }
        if let Some(logging) = &self.common.logging {
            logging
                .sentry_dsn
                .parse::<sentry::types::Dsn>()
                .map_err(|e| ConfigError::InvalidSentryDsn(e.to_string()))?;
        }

        self.gateway.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("invalid sentry dsn: {0}")]
    InvalidSentryDsn(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GATEWAY_YAML: &str = r#"
gateway:
    listener:
        host: 0.0.0.0
        port: 3000
    admin_listener:
        host: 127.0.0.1
        port: 3001
    session:
        secret: "0123456789abcdef0123456789abcdef"
        secure_cookie: false
    challenge:
        secret: challenge-secret
"#;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn gateway_config() {
        let tmp = write_tmp_file(GATEWAY_YAML);
        let config = Config::from_file(tmp.path()).expect("load config");
        config.validate().expect("valid config");

        assert!(config.common.metrics.is_none());
        assert!(config.common.logging.is_none());
        assert_eq!(config.gateway.listener.port, 3000);
        assert!(!config.gateway.session.secure_cookie);
        assert_eq!(config.gateway.session.cookie_name, "dashboard_session");
        assert!(config.gateway.servers.is_none());
    }

    #[test]
    fn common_config() {
        let yaml = format!(
            r#"
metrics:
    statsd_host: 127.0.0.1
    statsd_port: 8125
logging:
    sentry_dsn: "https://public@sentry.example.com/1"
{GATEWAY_YAML}"#
        );
        let tmp = write_tmp_file(&yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        config.validate().expect("valid config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_host, "127.0.0.1");
        assert_eq!(metrics.statsd_port, 8125);
    }

    #[test]
    fn invalid_config() {
        let yaml = format!("logging:\n    sentry_dsn: not-a-dsn\n{GATEWAY_YAML}");
        let tmp = write_tmp_file(&yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidSentryDsn(_)
        ));

        let tmp = write_tmp_file(&GATEWAY_YAML.replace("port: 3001", "port: 0"));
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid(ValidationError::InvalidPort)
        ));

        let tmp = write_tmp_file("metrics: {statsd_host: localhost, statsd_port: 8125}\n");
        assert!(matches!(
            Config::from_file(tmp.path()).unwrap_err(),
            ConfigError::ParseError(_)
        ));

        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/dashboard.yaml")).unwrap_err(),
            ConfigError::LoadError(_)
        ));
    }
}
