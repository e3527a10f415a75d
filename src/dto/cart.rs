use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Movie;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub movie_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub movie: Movie,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

/// `total_price` is a "would cost today" quote over current catalogue prices,
/// not the snapshot a checkout would freeze.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartItemDto>,
    #[schema(value_type = String, example = "19.98")]
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminCartView {
    pub user_id: Uuid,
    pub items: Vec<CartItemDto>,
    #[schema(value_type = String, example = "19.98")]
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminCartList {
    pub carts: Vec<AdminCartView>,
}
