use axum::{
    Json, Router,
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{CreatePaymentRequest, CreatePaymentResponse, PaymentList},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::ModeratorPaymentQuery,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_payments))
        .route("/create-payment", post(create_payment))
        .route("/stripe-webhook", post(stripe_webhook))
        .route("/mod", get(list_moderator_payments))
}

#[utoipa::path(
    post,
    path = "/api/payments/create-payment",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = ApiResponse<CreatePaymentResponse>),
        (status = 400, description = "Amount mismatch or gateway decline"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is not pending"),
        (status = 502, description = "Gateway unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> AppResult<Json<ApiResponse<CreatePaymentResponse>>> {
    let resp = payment_service::create_payment(&state, &user, payload).await?;
    Ok(Json(resp))
}

/// Unauthenticated by design; the signature header is the credential.
#[utoipa::path(
    post,
    path = "/api/payments/stripe-webhook",
    responses(
        (status = 200, description = "Event processed (idempotent)", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Invalid signature or failed payment")
    ),
    tag = "Payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok());
    let resp = payment_service::handle_webhook(&state, body.as_bytes(), signature).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments",
    responses(
        (status = 200, description = "Current user's payments", body = ApiResponse<PaymentList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    let resp = payment_service::list_payments(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/mod",
    params(
        ("user_id" = Option<Uuid>, Query, description = "Filter by user"),
        ("start_date" = Option<String>, Query, description = "Created at or after (RFC 3339)"),
        ("end_date" = Option<String>, Query, description = "Created at or before (RFC 3339)"),
        ("status" = Option<String>, Query, description = "Filter by status")
    ),
    responses(
        (status = 200, description = "Payments across users (moderator/admin)", body = ApiResponse<PaymentList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn list_moderator_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ModeratorPaymentQuery>,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    let resp = payment_service::list_moderator_payments(&state, &user, query).await?;
    Ok(Json(resp))
}
