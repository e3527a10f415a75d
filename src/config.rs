use std::env;

use anyhow::Context;

/// Process-wide configuration, built once in `main` and injected through
/// `AppState`. Nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    pub activation_token_ttl_hours: i64,
    pub password_reset_token_ttl_hours: i64,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Access and refresh tokens are signed with distinct secrets so a leaked
    /// token of one kind never verifies as the other.
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub endpoint_secret: String,
    pub api_base: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let jwt = JwtConfig {
            access_secret: env::var("SECRET_KEY_ACCESS").context("SECRET_KEY_ACCESS is not set")?,
            refresh_secret: env::var("SECRET_KEY_REFRESH")
                .context("SECRET_KEY_REFRESH is not set")?,
            access_ttl_minutes: env_i64("ACCESS_TOKEN_TTL_MINUTES", 30),
            refresh_ttl_days: env_i64("REFRESH_TOKEN_TTL_DAYS", 7),
        };

        let stripe = StripeConfig {
            secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            endpoint_secret: env::var("STRIPE_ENDPOINT_SECRET").unwrap_or_default(),
            api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        };

        Ok(Self {
            database_url,
            host,
            port,
            jwt,
            stripe,
            activation_token_ttl_hours: env_i64("ACTIVATION_TOKEN_TTL_HOURS", 24),
            password_reset_token_ttl_hours: env_i64("PASSWORD_RESET_TOKEN_TTL_HOURS", 1),
            base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
        })
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}
