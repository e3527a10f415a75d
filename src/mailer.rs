use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

/// Notification dispatcher contract. Delivery failures are the implementation's
/// problem; callers never observe them.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, template: &str, context: Value);
}

/// Logs outbound mail instead of delivering it. SMTP transport is an external
/// collaborator; this keeps the contract exercised in every environment.
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, to: &str, subject: &str, template: &str, context: Value) {
        tracing::info!(to, subject, template, %context, "email dispatched");
    }
}

/// Fire-and-forget dispatch, spawned only after the triggering transaction has
/// committed so a slow or failing mailer never blocks or rolls back business
/// state.
pub fn dispatch(
    mailer: Arc<dyn Mailer>,
    to: String,
    subject: &'static str,
    template: &'static str,
    context: Value,
) {
    tokio::spawn(async move {
        mailer.send(&to, subject, template, context).await;
    });
}

pub fn send_activation_email(mailer: Arc<dyn Mailer>, base_url: &str, email: &str, token: &str) {
    let activation_link = format!("{base_url}/api/accounts/activate?token={token}");
    dispatch(
        mailer,
        email.to_string(),
        "Registration",
        "activation_email.html",
        json!({ "email": email, "activation_link": activation_link }),
    );
}

pub fn send_activation_complete_email(mailer: Arc<dyn Mailer>, base_url: &str, email: &str) {
    let login_link = format!("{base_url}/api/accounts/login");
    dispatch(
        mailer,
        email.to_string(),
        "Account Activated",
        "activation_complete.html",
        json!({ "email": email, "login_link": login_link }),
    );
}

pub fn send_password_reset_email(mailer: Arc<dyn Mailer>, base_url: &str, email: &str, token: &str) {
    let reset_link = format!("{base_url}/api/accounts/password-reset/complete?token={token}");
    dispatch(
        mailer,
        email.to_string(),
        "Password Reset",
        "password_reset.html",
        json!({ "email": email, "reset_link": reset_link }),
    );
}

pub fn send_password_changed_email(mailer: Arc<dyn Mailer>, email: &str) {
    dispatch(
        mailer,
        email.to_string(),
        "Password Changed",
        "password_changed.html",
        json!({ "email": email }),
    );
}

pub fn send_order_placed_email(mailer: Arc<dyn Mailer>, email: &str, order_id: uuid::Uuid) {
    dispatch(
        mailer,
        email.to_string(),
        "Order Placed",
        "order_placed.html",
        json!({ "email": email, "order_id": order_id }),
    );
}
