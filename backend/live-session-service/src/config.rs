use anyhow::{anyhow, Result};
use std::env;

/// Service configuration, read once at startup and injected into components.
#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub host: String,
    pub port: u16,

    // External collaborators
    pub redis_url: String,

    // Webhook authentication
    pub webhook_shared_secret: String,

    // Admin endpoints (report actions, log queries); unset means deny all
    pub admin_token: Option<String>,

    // Disconnect grace-period supervisor
    pub grace_period_secs: i32,
    pub disconnect_debounce_ms: u64,

    // Analytics rollup cadence
    pub analytics_refresh_secs: u64,

    // Service configuration
    pub service_name: String,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let webhook_shared_secret = env::var("WEBHOOK_SHARED_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("WEBHOOK_SHARED_SECRET must be set"))?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8094),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            webhook_shared_secret,
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|s| !s.is_empty()),
            grace_period_secs: env::var("GRACE_PERIOD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            disconnect_debounce_ms: env::var("DISCONNECT_DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            analytics_refresh_secs: env::var("ANALYTICS_REFRESH_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "live-session-service".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            webhook_shared_secret: "test-secret".to_string(),
            admin_token: None,
            grace_period_secs: 30,
            disconnect_debounce_ms: 500,
            analytics_refresh_secs: 30,
            service_name: "live-session-service".to_string(),
            environment: "test".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_when_env_is_sparse() {
        env::set_var("WEBHOOK_SHARED_SECRET", "test-secret");
        env::remove_var("PORT");
        env::remove_var("GRACE_PERIOD_SECS");
        env::remove_var("ADMIN_TOKEN");

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8094);
        assert_eq!(config.grace_period_secs, 30);
        assert_eq!(config.disconnect_debounce_ms, 500);
        assert!(config.admin_token.is_none());
        assert_eq!(config.service_name, "live-session-service");
    }

    #[test]
    #[serial]
    fn missing_webhook_secret_is_an_error() {
        env::remove_var("WEBHOOK_SHARED_SECRET");
        assert!(Config::from_env().is_err());
        env::set_var("WEBHOOK_SHARED_SECRET", "test-secret");
    }
}
