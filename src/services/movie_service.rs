use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, QueryOrder, QuerySelect, Set};
use uuid::Uuid;

use crate::{
    dto::movies::{CreateMovieRequest, MovieList, UpdateMovieRequest},
    entity::movies::{ActiveModel as MovieActive, Column as MovieCol, Entity as Movies, Model as MovieModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Movie,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn list_movies(
    state: &AppState,
    pagination: Pagination,
) -> AppResult<ApiResponse<MovieList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Movies::find().order_by_desc(MovieCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(movie_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Movies", MovieList { items }, Some(meta)))
}

pub async fn get_movie(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Movie>> {
    let movie = Movies::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(movie_from_entity)
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Movie", movie, None))
}

pub async fn create_movie(
    state: &AppState,
    user: &AuthUser,
    payload: CreateMovieRequest,
) -> AppResult<ApiResponse<Movie>> {
    ensure_admin(user)?;

    let movie = MovieActive {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success("Movie created", movie_from_entity(movie), None))
}

/// Catalogue price changes only affect future carts and orders; existing
/// `price_at_order` snapshots are untouched.
pub async fn update_movie(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateMovieRequest,
) -> AppResult<ApiResponse<Movie>> {
    ensure_admin(user)?;

    let movie = Movies::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: MovieActive = movie.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    let movie = active.update(&state.orm).await?;

    Ok(ApiResponse::success("Movie updated", movie_from_entity(movie), None))
}

pub fn movie_from_entity(model: MovieModel) -> Movie {
    Movie {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
