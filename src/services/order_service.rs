use std::collections::HashSet;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartCol, Entity as CartItems,
        },
        movies::{Column as MovieCol, Entity as Movies},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments},
    },
    error::{AppError, AppResult},
    mailer,
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem, OrderStatus, UserRole},
    response::{ApiResponse, Meta},
    routes::params::{AdminOrderListQuery, OrderListQuery, SortOrder},
    state::AppState,
};

/// Movie ids already present in this user's orders with the given status.
async fn movie_ids_with_status<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    status: OrderStatus,
) -> AppResult<HashSet<Uuid>> {
    let order_ids: Vec<Uuid> = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user_id))
                .add(OrderCol::Status.eq(status.as_str())),
        )
        .all(conn)
        .await?
        .into_iter()
        .map(|order| order.id)
        .collect();

    if order_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let ids = OrderItems::find()
        .filter(OrderItemCol::OrderId.is_in(order_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|item| item.movie_id)
        .collect();

    Ok(ids)
}

/// Convert the caller's cart into a PENDING order with per-item price
/// snapshots, in one transaction. The FOR UPDATE lock on the cart rows
/// serializes concurrent checkouts for the same user.
pub async fn checkout(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let cart_rows = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .all(&txn)
        .await?;

    if cart_rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let purchased = movie_ids_with_status(&txn, user.user_id, OrderStatus::Paid).await?;
    let pending = movie_ids_with_status(&txn, user.user_id, OrderStatus::Pending).await?;

    let valid_rows: Vec<_> = cart_rows
        .into_iter()
        .filter(|row| !purchased.contains(&row.movie_id))
        .collect();

    if valid_rows.is_empty() {
        return Err(AppError::BadRequest("No valid items".into()));
    }

    if let Some(row) = valid_rows.iter().find(|row| pending.contains(&row.movie_id)) {
        return Err(AppError::Conflict(format!(
            "A pending order already exists for movie {}",
            row.movie_id
        )));
    }

    let movie_ids: Vec<Uuid> = valid_rows.iter().map(|row| row.movie_id).collect();
    let movies = Movies::find()
        .filter(MovieCol::Id.is_in(movie_ids.clone()))
        .all(&txn)
        .await?;

    if movies.len() != movie_ids.len() {
        return Err(AppError::BadRequest("No valid items".into()));
    }

    let total_amount: Decimal = movies.iter().map(|movie| movie.price).sum();

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending.as_str().into()),
        paid_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(movies.len());
    for movie in &movies {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            movie_id: Set(movie.id),
            price_at_order: Set(movie.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(order_item_from_entity(item));
    }

    // Only the rows that made it into the order leave the cart.
    CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartCol::UserId.eq(user.user_id))
                .add(CartCol::MovieId.is_in(movie_ids)),
        )
        .exec(&txn)
        .await?;

    txn.commit().await?;

    mailer::send_order_placed_email(state.mailer.clone(), &user.email, order.id);

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order),
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: AdminOrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(user_id) = query.user_id {
        condition = condition.add(OrderCol::UserId.eq(user_id));
    }
    if let Some(start_date) = query.start_date {
        condition = condition.add(OrderCol::CreatedAt.gte(start_date));
    }
    if let Some(end_date) = query.end_date {
        condition = condition.add(OrderCol::CreatedAt.lte(end_date));
    }
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let finder = Orders::find()
        .filter(condition)
        .order_by_desc(OrderCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

async fn find_owned_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<OrderModel> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = order.ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id && user.role != UserRole::Admin {
        return Err(AppError::Forbidden);
    }

    Ok(order)
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_owned_order(state, user, id).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    find_owned_order(state, user, id).await?;

    // A handed-out client_secret can still settle; canceling under it would
    // leave a successful payment against a canceled order.
    let attempts = Payments::find()
        .filter(PaymentCol::OrderId.eq(id))
        .count(&state.orm)
        .await?;
    if attempts > 0 {
        return Err(AppError::Conflict("Order already has payment attempts.".into()));
    }

    // Compare-and-set so a webhook-driven transition to paid never gets
    // overwritten.
    let result = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(OrderStatus::Canceled.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(id))
                .add(OrderCol::Status.eq(OrderStatus::Pending.as_str())),
        )
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::Conflict("Only pending orders can be canceled.".into()));
    }

    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_canceled",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order canceled",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Put a PENDING order's movies back into the cart and drop the order.
pub async fn move_order_to_cart(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id && user.role != UserRole::Admin {
        return Err(AppError::Forbidden);
    }

    if order.status != OrderStatus::Pending.as_str() {
        return Err(AppError::Conflict("Only pending orders can be moved to the cart.".into()));
    }

    // Payment rows are never deleted, so an order with attempts on record
    // cannot be dissolved back into cart items.
    let attempts = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .count(&txn)
        .await?;
    if attempts > 0 {
        return Err(AppError::Conflict("Order already has payment attempts.".into()));
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;

    let owner_id = order.user_id;
    let purchased = movie_ids_with_status(&txn, owner_id, OrderStatus::Paid).await?;
    let in_cart: HashSet<Uuid> = CartItems::find()
        .filter(CartCol::UserId.eq(owner_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|row| row.movie_id)
        .collect();

    for item in &items {
        if in_cart.contains(&item.movie_id) {
            return Err(AppError::Conflict("Movie is already in the cart.".into()));
        }
        if purchased.contains(&item.movie_id) {
            return Err(AppError::Conflict("Movie has already been purchased.".into()));
        }
    }

    for item in &items {
        CartItemActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(owner_id),
            movie_id: Set(item.movie_id),
            added_at: NotSet,
        }
        .insert(&txn)
        .await?;
    }

    // Cascade removes the order items.
    Orders::delete_by_id(order.id).exec(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_to_cart",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order moved to cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        status: OrderStatus::parse(&model.status).unwrap_or(OrderStatus::Pending),
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        movie_id: model.movie_id,
        price_at_order: model.price_at_order,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
