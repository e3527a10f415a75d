use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use password_hash::rand_core::OsRng;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::accounts::{
        ActivateRequest, LoginRequest, LoginResponse, MessageResponse, PasswordChangeRequest,
        PasswordResetCompleteRequest, PasswordResetRequest, RefreshTokenRequest,
        RefreshTokenResponse, RegisterRequest, RegisterResponse, ResendActivationRequest,
    },
    error::{AppError, AppResult},
    mailer,
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    security::{jwt::TokenKind, opaque},
    state::AppState,
};

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<RegisterResponse>> {
    let RegisterRequest { email, password } = payload;

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    if exist.is_some() {
        return Err(AppError::Conflict(format!(
            "A user with this email {email} already exists."
        )));
    }

    let password_hash = hash_password(&password)?;
    let user_id = Uuid::new_v4();
    let token = opaque::generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.activation_token_ttl_hours);

    // User and activation token land together or not at all.
    let mut txn = state.pool.begin().await?;
    sqlx::query("INSERT INTO users (id, email, password_hash, is_active, role) VALUES ($1, $2, $3, FALSE, 'user')")
        .bind(user_id)
        .bind(email.as_str())
        .bind(&password_hash)
        .execute(&mut *txn)
        .await?;
    sqlx::query(
        "INSERT INTO activation_tokens (id, user_id, token, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&token)
    .bind(expires_at)
    .execute(&mut *txn)
    .await?;
    txn.commit().await?;

    mailer::send_activation_email(state.mailer.clone(), &state.config.base_url, &email, &token);

    if let Err(err) = log_audit(
        &state.pool,
        Some(user_id),
        "user_register",
        Some("users"),
        Some(serde_json::json!({ "user_id": user_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "User created",
        RegisterResponse {
            id: user_id,
            email,
            is_active: false,
        },
        None,
    ))
}

pub async fn activate_user(
    state: &AppState,
    payload: ActivateRequest,
) -> AppResult<ApiResponse<MessageResponse>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = user.ok_or_else(|| AppError::NotFound)?;

    if user.is_active {
        return Err(AppError::BadRequest(
            "User account is already active.".into(),
        ));
    }

    let row: Option<(Uuid, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, expires_at FROM activation_tokens WHERE user_id = $1 AND token = $2",
    )
    .bind(user.id)
    .bind(payload.token.as_str())
    .fetch_optional(&state.pool)
    .await?;

    let Some((token_id, expires_at)) = row else {
        return Err(AppError::BadRequest(
            "Invalid or expired activation token.".into(),
        ));
    };

    if expires_at <= Utc::now() {
        sqlx::query("DELETE FROM activation_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&state.pool)
            .await?;
        return Err(AppError::BadRequest(
            "Invalid or expired activation token.".into(),
        ));
    }

    let mut txn = state.pool.begin().await?;
    sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
        .bind(user.id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM activation_tokens WHERE id = $1")
        .bind(token_id)
        .execute(&mut *txn)
        .await?;
    txn.commit().await?;

    mailer::send_activation_complete_email(state.mailer.clone(), &state.config.base_url, &user.email);

    Ok(ApiResponse::success(
        "OK",
        MessageResponse {
            message: "User account activated successfully.".into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn resend_activation_token(
    state: &AppState,
    payload: ResendActivationRequest,
) -> AppResult<ApiResponse<MessageResponse>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = user.ok_or_else(|| AppError::NotFound)?;

    if user.is_active {
        return Err(AppError::BadRequest(
            "User account is already active.".into(),
        ));
    }

    let token = opaque::generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.activation_token_ttl_hours);

    // Delete-then-insert keeps at most one live activation token per user.
    let mut txn = state.pool.begin().await?;
    sqlx::query("DELETE FROM activation_tokens WHERE user_id = $1")
        .bind(user.id)
        .execute(&mut *txn)
        .await?;
    sqlx::query(
        "INSERT INTO activation_tokens (id, user_id, token, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&token)
    .bind(expires_at)
    .execute(&mut *txn)
    .await?;
    txn.commit().await?;

    mailer::send_activation_email(state.mailer.clone(), &state.config.base_url, &user.email, &token);

    Ok(ApiResponse::success(
        "OK",
        MessageResponse {
            message: "A new activation token has been generated.".into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = match user {
        Some(u) if verify_password(&password, &u.password_hash) => u,
        _ => return Err(AppError::Unauthorized("Invalid email or password.".into())),
    };

    if !user.is_active {
        return Err(AppError::Forbidden);
    }

    let access_token = state.jwt.create_access_token(user.id)?;
    let refresh_token = state.jwt.create_refresh_token(user.id)?;
    let expires_at = Utc::now() + state.jwt.refresh_ttl();

    sqlx::query(
        "INSERT INTO refresh_tokens (id, user_id, token, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&refresh_token)
    .bind(expires_at)
    .execute(&state.pool)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id),
        "user_login",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse {
            access_token,
            refresh_token,
            token_type: "bearer".into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn refresh_token(
    state: &AppState,
    payload: RefreshTokenRequest,
) -> AppResult<ApiResponse<RefreshTokenResponse>> {
    // Expired or malformed tokens are a client error here, not a 401: the
    // stored-token lookup below is what distinguishes revocation.
    let claims = state
        .jwt
        .decode(&payload.refresh_token, TokenKind::Refresh)
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let stored: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM refresh_tokens WHERE token = $1")
        .bind(payload.refresh_token.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let Some((stored_id,)) = stored else {
        return Err(AppError::Unauthorized("Refresh token not found.".into()));
    };

    let user: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
        .bind(claims.user_id)
        .fetch_optional(&state.pool)
        .await?;

    if user.is_none() {
        return Err(AppError::NotFound);
    }

    let access_token = state.jwt.create_access_token(claims.user_id)?;

    // Rotate: the presented token is single-use.
    sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
        .bind(stored_id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "OK",
        RefreshTokenResponse { access_token },
        Some(Meta::empty()),
    ))
}

pub async fn logout_user(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<MessageResponse>> {
    // Coarse revocation: every session of this user is invalidated.
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "OK",
        MessageResponse {
            message: "Logout successful.".into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn password_reset_request(
    state: &AppState,
    payload: PasswordResetRequest,
) -> AppResult<ApiResponse<MessageResponse>> {
    const NEUTRAL: &str = "If you are registered, you will receive an email with instructions.";

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    // Same response whether or not the account exists.
    if let Some(user) = user.filter(|u| u.is_active) {
        let token = opaque::generate_token();
        let expires_at = Utc::now() + Duration::hours(state.config.password_reset_token_ttl_hours);

        let mut txn = state.pool.begin().await?;
        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut *txn)
            .await?;
        sqlx::query(
            "INSERT INTO password_reset_tokens (id, user_id, token, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&token)
        .bind(expires_at)
        .execute(&mut *txn)
        .await?;
        txn.commit().await?;

        mailer::send_password_reset_email(
            state.mailer.clone(),
            &state.config.base_url,
            &user.email,
            &token,
        );
    }

    Ok(ApiResponse::success(
        "OK",
        MessageResponse {
            message: NEUTRAL.into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn password_reset_complete(
    state: &AppState,
    payload: PasswordResetCompleteRequest,
) -> AppResult<ApiResponse<MessageResponse>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = match user.filter(|u| u.is_active) {
        Some(u) => u,
        None => return Err(AppError::BadRequest("Invalid email or token.".into())),
    };

    if verify_password(&payload.password, &user.password_hash) {
        return Err(AppError::BadRequest(
            "You cannot assign the same password.".into(),
        ));
    }

    let row: Option<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, token, expires_at FROM password_reset_tokens WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?;

    let valid = matches!(
        &row,
        Some((_, token, expires_at)) if *token == payload.token && *expires_at > Utc::now()
    );

    if !valid {
        // One guess per token: a mismatch burns the stored token.
        if let Some((token_id, _, _)) = row {
            sqlx::query("DELETE FROM password_reset_tokens WHERE id = $1")
                .bind(token_id)
                .execute(&state.pool)
                .await?;
        }
        return Err(AppError::BadRequest("Invalid email or token.".into()));
    }

    let password_hash = hash_password(&payload.password)?;

    let mut txn = state.pool.begin().await?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(user.id)
        .bind(&password_hash)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1")
        .bind(user.id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user.id)
        .execute(&mut *txn)
        .await?;
    txn.commit().await?;

    mailer::send_password_changed_email(state.mailer.clone(), &user.email);

    Ok(ApiResponse::success(
        "OK",
        MessageResponse {
            message: "Password reset successfully.".into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn change_user_password(
    state: &AppState,
    user: &AuthUser,
    payload: PasswordChangeRequest,
) -> AppResult<ApiResponse<MessageResponse>> {
    let current: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?;
    let current = current.ok_or(AppError::NotFound)?;

    if !verify_password(&payload.password, &current.password_hash) {
        return Err(AppError::BadRequest("Invalid email or password.".into()));
    }

    if verify_password(&payload.new_password, &current.password_hash) {
        return Err(AppError::BadRequest(
            "You cannot assign the same password.".into(),
        ));
    }

    let password_hash = hash_password(&payload.new_password)?;

    let mut txn = state.pool.begin().await?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(user.user_id)
        .bind(&password_hash)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&mut *txn)
        .await?;
    txn.commit().await?;

    mailer::send_password_changed_email(state.mailer.clone(), &current.email);

    Ok(ApiResponse::success(
        "OK",
        MessageResponse {
            message: "Password changed successfully".into(),
        },
        Some(Meta::empty()),
    ))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong-pass", &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
