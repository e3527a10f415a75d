use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        cart::{AddToCartRequest, AdminCartList, CartView},
        payments::CreatePaymentResponse,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::CartItem,
    response::ApiResponse,
    services::{cart_service, payment_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(view_cart).post(add_to_cart))
        .route("/items/{item_id}", delete(remove_from_cart))
        .route("/clear", delete(clear_cart))
        .route("/pay-all", post(pay_all))
        .route("/admin/detail", get(list_all_carts))
}

#[utoipa::path(
    get,
    path = "/api/carts",
    responses(
        (status = 200, description = "Current user's cart with a live price quote", body = ApiResponse<CartView>)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn view_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let resp = cart_service::view_cart(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/carts",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Movie added to cart", body = ApiResponse<CartItem>),
        (status = 400, description = "Movie not found"),
        (status = 409, description = "Already in cart or already purchased")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<CartItem>>> {
    let resp = cart_service::add_to_cart(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/carts/items/{item_id}",
    params(
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    responses(
        (status = 200, description = "Removed from cart", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Cart item not found"),
        (status = 409, description = "Movie already purchased")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = cart_service::remove_from_cart(&state, &user, item_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/carts/clear",
    responses(
        (status = 200, description = "All items removed", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Cart is empty")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = cart_service::clear_cart(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/carts/pay-all",
    responses(
        (status = 200, description = "One payment intent covering all pending orders", body = ApiResponse<CreatePaymentResponse>),
        (status = 400, description = "No pending orders")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn pay_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CreatePaymentResponse>>> {
    let resp = payment_service::pay_all(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/carts/admin/detail",
    responses(
        (status = 200, description = "All users' carts", body = ApiResponse<AdminCartList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn list_all_carts(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<AdminCartList>>> {
    let resp = cart_service::list_all_carts(&state, &user).await?;
    Ok(Json(resp))
}
