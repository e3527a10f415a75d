use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::payments::{CreatePaymentRequest, CreatePaymentResponse, PaymentList},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
    },
    error::{AppError, AppResult},
    gateway::verify_webhook_signature,
    middleware::auth::{AuthUser, ensure_moderator},
    models::{OrderStatus, Payment, PaymentStatus, UserRole},
    response::{ApiResponse, Meta},
    routes::params::ModeratorPaymentQuery,
    state::AppState,
};

/// The gateway takes amounts in the smallest currency unit.
fn amount_in_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| AppError::BadRequest("Amount out of range".into()))
}

/// Defense against upstream data corruption: the immutable order total must
/// still equal the sum of its item snapshots.
async fn verify_order_integrity(state: &AppState, order: &OrderModel) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;

    let calculated: Decimal = items.iter().map(|item| item.price_at_order).sum();
    if calculated != order.total_amount {
        return Err(AppError::BadRequest(
            "Order total does not match calculated amount.".into(),
        ));
    }
    Ok(())
}

pub async fn create_payment(
    state: &AppState,
    user: &AuthUser,
    payload: CreatePaymentRequest,
) -> AppResult<ApiResponse<CreatePaymentResponse>> {
    let order = Orders::find_by_id(payload.order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id && user.role != UserRole::Admin {
        return Err(AppError::Forbidden);
    }

    if order.status != OrderStatus::Pending.as_str() {
        return Err(AppError::Conflict("Order is not pending.".into()));
    }

    verify_order_integrity(state, &order).await?;

    let amount_minor = amount_in_minor_units(order.total_amount)?;
    let intent = state
        .gateway
        .create_payment_intent(
            amount_minor,
            "usd",
            vec![("order_id".into(), order.id.to_string())],
        )
        .await?;

    // Pending until the webhook confirms settlement.
    PaymentActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(order.user_id),
        order_id: Set(order.id),
        amount: Set(order.total_amount),
        external_payment_id: Set(Some(intent.id.clone())),
        status: Set(PaymentStatus::Pending.as_str().into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_intent_created",
        Some("payments"),
        Some(serde_json::json!({ "order_id": order.id, "external_payment_id": intent.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment intent created",
        CreatePaymentResponse {
            client_secret: intent.client_secret,
        },
        None,
    ))
}

/// One intent covering every PENDING order of the caller; one pending Payment
/// row per order, all sharing the intent id.
pub async fn pay_all(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CreatePaymentResponse>> {
    let orders = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Status.eq(OrderStatus::Pending.as_str())),
        )
        .order_by_asc(OrderCol::CreatedAt)
        .all(&state.orm)
        .await?;

    if orders.is_empty() {
        return Err(AppError::BadRequest("No order in cart or all paid".into()));
    }

    for order in &orders {
        verify_order_integrity(state, order).await?;
    }

    let total_amount: Decimal = orders.iter().map(|order| order.total_amount).sum();
    let amount_minor = amount_in_minor_units(total_amount)?;

    let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
    let metadata = vec![(
        "order_ids".to_string(),
        serde_json::to_string(&order_ids).map_err(|e| AppError::Internal(e.into()))?,
    )];

    let intent = state
        .gateway
        .create_payment_intent(amount_minor, "usd", metadata)
        .await?;

    let txn = state.orm.begin().await?;
    for order in &orders {
        PaymentActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(order.user_id),
            order_id: Set(order.id),
            amount: Set(order.total_amount),
            external_payment_id: Set(Some(intent.id.clone())),
            status: Set(PaymentStatus::Pending.as_str().into()),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Payment intent created",
        CreatePaymentResponse {
            client_secret: intent.client_secret,
        },
        None,
    ))
}

/// Order ids referenced by a webhook event: either a single `order_id` or a
/// JSON-encoded `order_ids` array, both under the intent metadata.
fn resolve_order_ids(metadata: &Value) -> AppResult<Vec<Uuid>> {
    if let Some(order_id) = metadata.get("order_id").and_then(Value::as_str) {
        let id = Uuid::parse_str(order_id)
            .map_err(|_| AppError::BadRequest("Invalid order id in metadata".into()))?;
        return Ok(vec![id]);
    }

    if let Some(order_ids) = metadata.get("order_ids").and_then(Value::as_str) {
        let ids: Vec<Uuid> = serde_json::from_str(order_ids)
            .map_err(|_| AppError::BadRequest("Invalid order ids in metadata".into()))?;
        return Ok(ids);
    }

    Err(AppError::BadRequest("No order reference in metadata".into()))
}

/// Reconcile gateway state with ours. Delivery is at-least-once, so every
/// mutation is a compare-and-set and a duplicate event is a no-op.
pub async fn handle_webhook(
    state: &AppState,
    payload: &[u8],
    signature_header: Option<&str>,
) -> AppResult<ApiResponse<Value>> {
    let signature_header =
        signature_header.ok_or_else(|| AppError::BadRequest("Invalid signature".into()))?;

    verify_webhook_signature(&state.config.stripe.endpoint_secret, payload, signature_header)
        .map_err(|err| {
            tracing::warn!(error = %err, "webhook signature rejected");
            AppError::BadRequest("Invalid signature".into())
        })?;

    let event: Value = serde_json::from_slice(payload)
        .map_err(|_| AppError::BadRequest("Malformed event payload".into()))?;

    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    let metadata = event
        .pointer("/data/object/metadata")
        .cloned()
        .unwrap_or(Value::Null);

    match event_type {
        "payment_intent.succeeded" => {
            let order_ids = resolve_order_ids(&metadata)?;

            let txn = state.orm.begin().await?;
            for order_id in &order_ids {
                Payments::update_many()
                    .col_expr(
                        PaymentCol::Status,
                        Expr::value(PaymentStatus::Successful.as_str()),
                    )
                    .filter(
                        Condition::all()
                            .add(PaymentCol::OrderId.eq(*order_id))
                            .add(PaymentCol::Status.ne(PaymentStatus::Successful.as_str())),
                    )
                    .exec(&txn)
                    .await?;

                Orders::update_many()
                    .col_expr(OrderCol::Status, Expr::value(OrderStatus::Paid.as_str()))
                    .col_expr(OrderCol::PaidAt, Expr::value(Some(Utc::now())))
                    .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
                    .filter(
                        Condition::all()
                            .add(OrderCol::Id.eq(*order_id))
                            .add(OrderCol::Status.eq(OrderStatus::Pending.as_str())),
                    )
                    .exec(&txn)
                    .await?;
            }
            txn.commit().await?;

            tracing::info!(?order_ids, "payment confirmed by webhook");
        }
        "payment_intent.payment_failed" => {
            if let Ok(order_ids) = resolve_order_ids(&metadata) {
                let txn = state.orm.begin().await?;
                for order_id in &order_ids {
                    Payments::update_many()
                        .col_expr(
                            PaymentCol::Status,
                            Expr::value(PaymentStatus::Cancelled.as_str()),
                        )
                        .filter(
                            Condition::all()
                                .add(PaymentCol::OrderId.eq(*order_id))
                                .add(PaymentCol::Status.eq(PaymentStatus::Pending.as_str())),
                        )
                        .exec(&txn)
                        .await?;
                }
                txn.commit().await?;
            }

            return Err(AppError::BadRequest(
                "Payment failed. Please try a different payment method.".into(),
            ));
        }
        other => {
            tracing::debug!(event_type = other, "ignoring webhook event");
        }
    }

    Ok(ApiResponse::success(
        "OK",
        serde_json::json!({ "status": "success" }),
        Some(Meta::empty()),
    ))
}

pub async fn list_payments(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<PaymentList>> {
    let payments = Payments::find()
        .filter(PaymentCol::UserId.eq(user.user_id))
        .order_by_desc(PaymentCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(payment_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        PaymentList { items: payments },
        Some(Meta::empty()),
    ))
}

pub async fn list_moderator_payments(
    state: &AppState,
    user: &AuthUser,
    query: ModeratorPaymentQuery,
) -> AppResult<ApiResponse<PaymentList>> {
    ensure_moderator(user)?;

    let mut condition = Condition::all();
    if let Some(user_id) = query.user_id {
        condition = condition.add(PaymentCol::UserId.eq(user_id));
    }
    if let Some(start_date) = query.start_date {
        condition = condition.add(PaymentCol::CreatedAt.gte(start_date));
    }
    if let Some(end_date) = query.end_date {
        condition = condition.add(PaymentCol::CreatedAt.lte(end_date));
    }
    if let Some(status) = query.status {
        condition = condition.add(PaymentCol::Status.eq(status.as_str()));
    }

    let payments = Payments::find()
        .filter(condition)
        .order_by_desc(PaymentCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(payment_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        PaymentList { items: payments },
        Some(Meta::empty()),
    ))
}

pub fn payment_from_entity(model: PaymentModel) -> Payment {
    Payment {
        id: model.id,
        user_id: model.user_id,
        order_id: model.order_id,
        amount: model.amount,
        external_payment_id: model.external_payment_id,
        status: PaymentStatus::parse(&model.status).unwrap_or(PaymentStatus::Pending),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn converts_amount_to_minor_units() {
        assert_eq!(amount_in_minor_units(dec!(9.99)).unwrap(), 999);
        assert_eq!(amount_in_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(amount_in_minor_units(dec!(120.00)).unwrap(), 12000);
    }

    #[test]
    fn resolves_single_order_id() {
        let id = Uuid::new_v4();
        let metadata = json!({ "order_id": id.to_string() });
        assert_eq!(resolve_order_ids(&metadata).unwrap(), vec![id]);
    }

    #[test]
    fn resolves_order_ids_array() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let metadata = json!({ "order_ids": serde_json::to_string(&vec![a, b]).unwrap() });
        assert_eq!(resolve_order_ids(&metadata).unwrap(), vec![a, b]);
    }

    #[test]
    fn rejects_missing_metadata() {
        assert!(resolve_order_ids(&json!({})).is_err());
        assert!(resolve_order_ids(&json!({ "order_id": "not-a-uuid" })).is_err());
        assert!(resolve_order_ids(&json!({ "order_ids": "nonsense" })).is_err());
    }
}
