use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

const MIN_SECRET_LEN: usize = 32;

/// Runtime configuration, read from the environment once at startup.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub log_level: String,
    /// Deployment label surfaced by the health endpoint ("development",
    /// "staging", "production", ...).
    pub environment: String,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// `DATABASE_URL` and `PRAXIS_JWT_SECRET` are required; everything else
    /// has a default. Failures here are configuration errors (exit code 1 in
    /// the CLI).
    pub fn from_env() -> Result<Self> {
        let database_url = require_env("DATABASE_URL")?;
        let jwt_secret = require_env("PRAXIS_JWT_SECRET")?;

        let port = match std::env::var("PRAXIS_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| CoreError::Validation(format!("PRAXIS_PORT '{raw}' is not a port")))?,
            Err(_) => default_port(),
        };

        let log_level = std::env::var("PRAXIS_LOG").unwrap_or_else(|_| "info".to_string());
        let environment =
            std::env::var("PRAXIS_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Self {
            database_url,
            jwt_secret,
            port,
            log_level,
            environment,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(CoreError::Validation(format!(
                "PRAXIS_JWT_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.database_url.is_empty() {
            return Err(CoreError::Validation("DATABASE_URL is empty".to_string()));
        }
        Ok(())
    }
}

// Manual Debug keeps the signing secret and any URL-embedded password out of
// logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("jwt_secret", &"<redacted>")
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("environment", &self.environment)
            .finish()
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CoreError::Validation(format!("{key} must be set")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "postgres://localhost/praxis".to_string(),
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            environment: "test".to_string(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut config = base_config();
        config.jwt_secret = "short".to_string();
        assert!(matches!(
            config.validate(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", base_config());
        assert!(!rendered.contains("postgres://"));
        assert!(!rendered.contains("abcdef"));
        assert!(rendered.contains("<redacted>"));
    }
}
