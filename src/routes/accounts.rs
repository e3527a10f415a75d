use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::accounts::{
        ActivateRequest, LoginRequest, LoginResponse, MessageResponse, PasswordChangeRequest,
        PasswordResetCompleteRequest, PasswordResetRequest, RefreshTokenRequest,
        RefreshTokenResponse, RegisterRequest, RegisterResponse, ResendActivationRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::auth_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/activate", post(activate))
        .route("/resend-activation", post(resend_activation))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/password-reset/request", post(password_reset_request))
        .route("/password-reset/complete", post(password_reset_complete))
        .route("/change-password", post(change_password))
}

#[utoipa::path(
    post,
    path = "/api/accounts/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Register user", body = ApiResponse<RegisterResponse>),
        (status = 409, description = "Email already taken")
    ),
    tag = "Accounts"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<Json<ApiResponse<RegisterResponse>>> {
    let resp = auth_service::register_user(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/activate",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "Activate account", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Invalid or expired activation token"),
        (status = 404, description = "User not found")
    ),
    tag = "Accounts"
)]
pub async fn activate(
    State(state): State<AppState>,
    Json(payload): Json<ActivateRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let resp = auth_service::activate_user(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/resend-activation",
    request_body = ResendActivationRequest,
    responses(
        (status = 200, description = "New activation token issued", body = ApiResponse<MessageResponse>)
    ),
    tag = "Accounts"
)]
pub async fn resend_activation(
    State(state): State<AppState>,
    Json(payload): Json<ResendActivationRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let resp = auth_service::resend_activation_token(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login user", body = ApiResponse<LoginResponse>),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not activated")
    ),
    tag = "Accounts"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let resp = auth_service::login_user(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/refresh",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New access token", body = ApiResponse<RefreshTokenResponse>),
        (status = 400, description = "Token expired or invalid"),
        (status = 401, description = "Refresh token not found")
    ),
    tag = "Accounts"
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> AppResult<Json<ApiResponse<RefreshTokenResponse>>> {
    let resp = auth_service::refresh_token(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/logout",
    responses(
        (status = 200, description = "Logout user", body = ApiResponse<MessageResponse>)
    ),
    security(("bearer_auth" = [])),
    tag = "Accounts"
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let resp = auth_service::logout_user(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Neutral acknowledgement", body = ApiResponse<MessageResponse>)
    ),
    tag = "Accounts"
)]
pub async fn password_reset_request(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let resp = auth_service::password_reset_request(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/password-reset/complete",
    request_body = PasswordResetCompleteRequest,
    responses(
        (status = 200, description = "Password reset", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Invalid email or token")
    ),
    tag = "Accounts"
)]
pub async fn password_reset_complete(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetCompleteRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let resp = auth_service::password_reset_complete(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/accounts/change-password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Invalid password")
    ),
    security(("bearer_auth" = [])),
    tag = "Accounts"
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<PasswordChangeRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let resp = auth_service::change_user_password(&state, &user, payload).await?;
    Ok(Json(resp))
}
