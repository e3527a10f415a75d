use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::config::StripeConfig;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a webhook timestamp may lag behind `now` before the event is
/// rejected as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Outbound contract with the external payment gateway. `amount_minor` is the
/// charge in the smallest currency unit (cents).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError>;
}

pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), currency.to_string()),
        ];
        for (key, value) in metadata {
            form.push((format!("metadata[{key}]"), value));
        }

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "payment intent request failed");
                AppError::GatewayUnavailable
            })?;

        if !response.status().is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("payment intent was declined")
                .to_string();
            return Err(AppError::Gateway(message));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| AppError::GatewayUnavailable)?;

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or(AppError::Gateway("intent response missing id".into()))?
            .to_string();
        let client_secret = body
            .get("client_secret")
            .and_then(Value::as_str)
            .ok_or(AppError::Gateway("intent response missing client_secret".into()))?
            .to_string();

        Ok(PaymentIntent { id, client_secret })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookVerifyError {
    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature mismatch")]
    Mismatch,

    #[error("timestamp outside tolerance")]
    StaleTimestamp,
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>`) against the
/// raw request body. The signed payload is `"{t}.{body}"`; comparison is
/// constant-time via [`Mac::verify_slice`].
pub fn verify_webhook_signature(
    endpoint_secret: &str,
    payload: &[u8],
    signature_header: &str,
) -> Result<(), WebhookVerifyError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookVerifyError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookVerifyError::MalformedHeader);
    }

    if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookVerifyError::StaleTimestamp);
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(endpoint_secret.as_bytes())
            .map_err(|_| WebhookVerifyError::Mismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(WebhookVerifyError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let now = Utc::now().timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_test", now, payload));
        assert_eq!(
            verify_webhook_signature("whsec_test", payload, &header),
            Ok(())
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_other", now, payload));
        assert_eq!(
            verify_webhook_signature("whsec_test", payload, &header),
            Err(WebhookVerifyError::Mismatch)
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = Utc::now().timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_test", now, b"{\"a\":1}"));
        assert_eq!(
            verify_webhook_signature("whsec_test", b"{\"a\":2}", &header),
            Err(WebhookVerifyError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let old = Utc::now().timestamp() - SIGNATURE_TOLERANCE_SECS - 10;
        let header = format!("t={},v1={}", old, sign("whsec_test", old, payload));
        assert_eq!(
            verify_webhook_signature("whsec_test", payload, &header),
            Err(WebhookVerifyError::StaleTimestamp)
        );
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(
            verify_webhook_signature("whsec_test", b"{}", "v1=deadbeef"),
            Err(WebhookVerifyError::MalformedHeader)
        );
        assert_eq!(
            verify_webhook_signature("whsec_test", b"{}", "t=123"),
            Err(WebhookVerifyError::MalformedHeader)
        );
    }
}
