use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Movie;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMovieRequest {
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = String, example = "9.99")]
    pub price: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateMovieRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = String, example = "9.99")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MovieList {
    pub items: Vec<Movie>,
}
