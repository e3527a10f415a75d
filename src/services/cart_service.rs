use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AdminCartList, AdminCartView, AddToCartRequest, CartItemDto, CartView},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{CartItem, Movie},
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(FromRow)]
struct CartWithMovieRow {
    cart_item_id: Uuid,
    added_at: DateTime<Utc>,
    movie_id: Uuid,
    name: String,
    description: Option<String>,
    price: Decimal,
    created_at: DateTime<Utc>,
}

impl CartWithMovieRow {
    fn into_dto(self) -> CartItemDto {
        CartItemDto {
            id: self.cart_item_id,
            movie: Movie {
                id: self.movie_id,
                name: self.name,
                description: self.description,
                price: self.price,
                created_at: self.created_at,
            },
            added_at: self.added_at,
        }
    }
}

async fn load_cart(pool: &sqlx::PgPool, user_id: Uuid) -> AppResult<Vec<CartItemDto>> {
    let rows = sqlx::query_as::<_, CartWithMovieRow>(
        r#"
        SELECT ci.id AS cart_item_id, ci.added_at,
               m.id AS movie_id, m.name, m.description, m.price, m.created_at
        FROM cart_items ci
        JOIN movies m ON m.id = ci.movie_id
        WHERE ci.user_id = $1
        ORDER BY ci.added_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CartWithMovieRow::into_dto).collect())
}

/// True when the movie already belongs to a PAID order of this user.
async fn movie_purchased(pool: &sqlx::PgPool, user_id: Uuid, movie_id: Uuid) -> AppResult<bool> {
    let purchased: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.user_id = $1 AND oi.movie_id = $2 AND o.status = 'paid'
        )
        "#,
    )
    .bind(user_id)
    .bind(movie_id)
    .fetch_one(pool)
    .await?;
    Ok(purchased.0)
}

pub async fn view_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let items = load_cart(&state.pool, user.user_id).await?;
    // Quote at today's catalogue prices; checkout snapshots separately.
    let total_price: Decimal = items.iter().map(|item| item.movie.price).sum();

    Ok(ApiResponse::success(
        "OK",
        CartView { items, total_price },
        Some(Meta::empty()),
    ))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    let movie_exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM movies WHERE id = $1")
        .bind(payload.movie_id)
        .fetch_optional(&state.pool)
        .await?;
    if movie_exist.is_none() {
        return Err(AppError::BadRequest("Movie not found".to_string()));
    }

    let exist: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM cart_items WHERE user_id = $1 AND movie_id = $2")
            .bind(user.user_id)
            .bind(payload.movie_id)
            .fetch_optional(&state.pool)
            .await?;
    if exist.is_some() {
        return Err(AppError::Conflict("Movie is already in the cart.".into()));
    }

    if movie_purchased(&state.pool, user.user_id, payload.movie_id).await? {
        return Err(AppError::Conflict("Movie has already been purchased.".into()));
    }

    let cart_item = sqlx::query_as::<_, CartItem>(
        "INSERT INTO cart_items (id, user_id, movie_id) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.movie_id)
    .fetch_one(&state.pool)
    .await
    .map_err(|err| match &err {
        // Concurrent add of the same movie loses against the unique constraint.
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict("Movie is already in the cart.".into())
        }
        _ => AppError::DbError(err),
    })?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "movie_id": payload.movie_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item, None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let item: Option<CartItem> =
        sqlx::query_as("SELECT * FROM cart_items WHERE id = $1 AND user_id = $2")
            .bind(item_id)
            .bind(user.user_id)
            .fetch_optional(&state.pool)
            .await?;

    let item = item.ok_or(AppError::NotFound)?;

    if movie_purchased(&state.pool, user.user_id, item.movie_id).await? {
        return Err(AppError::Conflict("Movie has already been purchased.".into()));
    }

    sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
        .bind(item_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "cart_item_id": item_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    // An already-empty cart is a client error here, not a no-op.
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(ApiResponse::success(
        "All items removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn list_all_carts(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AdminCartList>> {
    ensure_admin(user)?;

    let user_ids: Vec<(Uuid,)> =
        sqlx::query_as("SELECT DISTINCT user_id FROM cart_items ORDER BY user_id")
            .fetch_all(&state.pool)
            .await?;

    let mut carts = Vec::with_capacity(user_ids.len());
    for (user_id,) in user_ids {
        let items = load_cart(&state.pool, user_id).await?;
        let total_price: Decimal = items.iter().map(|item| item.movie.price).sum();
        carts.push(AdminCartView {
            user_id,
            items,
            total_price,
        });
    }

    Ok(ApiResponse::success(
        "OK",
        AdminCartList { carts },
        Some(Meta::empty()),
    ))
}
