// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use hmac::{Hmac, Mac};
use sea_orm::{ConnectionTrait, Statement};
use sha2::Sha256;
use uuid::Uuid;

use axum_cinema_api::{
    config::{AppConfig, JwtConfig, StripeConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    error::AppError,
    gateway::{PaymentGateway, PaymentIntent},
    mailer::TracingMailer,
    security::jwt::JwtManager,
    state::AppState,
};

pub const ENDPOINT_SECRET: &str = "whsec_test";

/// Gateway stand-in that hands out intents without any network traffic.
pub struct MockGateway;

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError> {
        Ok(PaymentIntent {
            id: format!("pi_{}", Uuid::new_v4().simple()),
            client_secret: format!("cs_{}", Uuid::new_v4().simple()),
        })
    }
}

pub fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt: JwtConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            access_ttl_minutes: 30,
            refresh_ttl_days: 7,
        },
        stripe: StripeConfig {
            secret_key: "sk_test".into(),
            endpoint_secret: ENDPOINT_SECRET.into(),
            api_base: "http://localhost:0".into(),
        },
        activation_token_ttl_hours: 24,
        password_reset_token_ttl_hours: 1,
        base_url: "http://127.0.0.1:3000".into(),
    }
}

fn db_lock() -> Arc<Mutex<()>> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone()
}

/// Connect, migrate and truncate so each flow starts from a clean slate.
/// Returns `None` when no database is configured in the environment. The
/// returned guard serializes tests sharing the database.
pub async fn setup_state() -> anyhow::Result<Option<(OwnedMutexGuard<()>, AppState)>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(None);
            }
        };

    let guard = db_lock().lock_owned().await;

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE payments, order_items, orders, cart_items, refresh_tokens, \
         password_reset_tokens, activation_tokens, audit_logs, movies, users \
         RESTART IDENTITY CASCADE",
    ))
    .await?;

    let config = test_config(&database_url);
    let state = AppState {
        pool,
        orm,
        jwt: JwtManager::new(&config.jwt),
        gateway: Arc::new(MockGateway),
        mailer: Arc::new(TracingMailer),
        config: Arc::new(config),
    };
    Ok(Some((guard, state)))
}

/// Build a `Stripe-Signature` header the way the gateway would.
pub fn sign_webhook(payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(ENDPOINT_SECRET.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
