mod common;

use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use axum_cinema_api::{
    dto::{cart::AddToCartRequest, movies::UpdateMovieRequest, payments::CreatePaymentRequest},
    entity::{
        movies::ActiveModel as MovieActive,
        orders::Entity as Orders,
        payments::{Column as PaymentCol, Entity as Payments},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus, UserRole},
    services::{auth_service, cart_service, movie_service, order_service, payment_service},
    state::AppState,
};

use common::{setup_state, sign_webhook};

async fn seed_user(state: &AppState, email: &str, role: UserRole) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set(auth_service::hash_password("Password123!")?),
        is_active: Set(true),
        role: Set(role.as_str().to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        email: user.email,
        role,
    })
}

async fn seed_movie(state: &AppState, name: &str, price: rust_decimal::Decimal) -> anyhow::Result<Uuid> {
    let movie = MovieActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(movie.id)
}

fn succeeded_event(order_id: Uuid) -> Vec<u8> {
    serde_json::json!({
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_test", "metadata": { "order_id": order_id.to_string() } } }
    })
    .to_string()
    .into_bytes()
}

// Full journey: register -> activate -> login -> cart -> checkout ->
// payment intent -> webhook confirmation -> re-purchase rejected.
#[tokio::test]
async fn end_to_end_purchase_flow() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    // Register and activate through the real token flow.
    auth_service::register_user(
        &state,
        axum_cinema_api::dto::accounts::RegisterRequest {
            email: "alice@example.com".into(),
            password: "Password123!".into(),
        },
    )
    .await?;

    let (token,): (String,) = sqlx::query_as(
        "SELECT at.token FROM activation_tokens at JOIN users u ON u.id = at.user_id WHERE u.email = $1",
    )
    .bind("alice@example.com")
    .fetch_one(&state.pool)
    .await?;

    auth_service::activate_user(
        &state,
        axum_cinema_api::dto::accounts::ActivateRequest {
            email: "alice@example.com".into(),
            token,
        },
    )
    .await?;

    let login = auth_service::login_user(
        &state,
        axum_cinema_api::dto::accounts::LoginRequest {
            email: "alice@example.com".into(),
            password: "Password123!".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert!(!login.access_token.is_empty());

    let (user_id,): (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind("alice@example.com")
        .fetch_one(&state.pool)
        .await?;
    let alice = AuthUser {
        user_id,
        email: "alice@example.com".into(),
        role: UserRole::User,
    };

    let movie_id = seed_movie(&state, "Blade Runner", dec!(9.99)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;

    let view = cart_service::view_cart(&state, &alice).await?.data.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.total_price, dec!(9.99));

    let order = order_service::checkout(&state, &alice).await?.data.unwrap();
    assert_eq!(order.order.total_amount, dec!(9.99));
    assert_eq!(order.order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].price_at_order, dec!(9.99));

    let (cart_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
        .bind(alice.user_id)
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(cart_count, 0, "checkout should empty the cart");

    let intent = payment_service::create_payment(
        &state,
        &alice,
        CreatePaymentRequest {
            order_id: order.order.id,
        },
    )
    .await?
    .data
    .unwrap();
    assert!(!intent.client_secret.is_empty());

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.order.id))
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending.as_str());

    // Gateway confirms asynchronously.
    let payload = succeeded_event(order.order.id);
    let signature = sign_webhook(&payload);
    payment_service::handle_webhook(&state, &payload, Some(&signature)).await?;

    let paid = Orders::find_by_id(order.order.id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid.as_str());
    assert!(paid.paid_at.is_some());

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.order.id))
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Successful.as_str());

    // At-least-once delivery: the duplicate event is a no-op.
    let signature = sign_webhook(&payload);
    payment_service::handle_webhook(&state, &payload, Some(&signature)).await?;

    let payments = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.order.id))
        .all(&state.orm)
        .await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Successful.as_str());

    // The purchased movie can never re-enter the cart.
    let err = cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn order_total_survives_catalogue_price_change() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let admin = seed_user(&state, "admin@example.com", UserRole::Admin).await?;
    let movie_id = seed_movie(&state, "Alien", dec!(12.50)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let order = order_service::checkout(&state, &alice).await?.data.unwrap();

    movie_service::update_movie(
        &state,
        &admin,
        movie_id,
        UpdateMovieRequest {
            name: None,
            description: None,
            price: Some(dec!(19.99)),
        },
    )
    .await?;

    let reloaded = order_service::get_order(&state, &alice, order.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(reloaded.order.total_amount, dec!(12.50));
    assert_eq!(reloaded.items[0].price_at_order, dec!(12.50));

    // The integrity check still passes after the catalogue change.
    payment_service::create_payment(
        &state,
        &alice,
        CreatePaymentRequest {
            order_id: order.order.id,
        },
    )
    .await?;

    Ok(())
}

#[tokio::test]
async fn duplicate_cart_add_conflicts() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let movie_id = seed_movie(&state, "Heat", dec!(7.00)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let err = cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let view = cart_service::view_cart(&state, &alice).await?.data.unwrap();
    assert_eq!(view.items.len(), 1);

    Ok(())
}

#[tokio::test]
async fn checkout_rejects_duplicate_pending_order() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let movie_id = seed_movie(&state, "Ronin", dec!(5.00)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    order_service::checkout(&state, &alice).await?;

    // Same movie back in the cart while its order is still pending.
    sqlx::query("INSERT INTO cart_items (id, user_id, movie_id) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(alice.user_id)
        .bind(movie_id)
        .execute(&state.pool)
        .await?;

    let err = order_service::checkout(&state, &alice).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn order_access_is_owner_or_admin_only() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let bob = seed_user(&state, "bob@example.com", UserRole::User).await?;
    let admin = seed_user(&state, "admin@example.com", UserRole::Admin).await?;
    let movie_id = seed_movie(&state, "Se7en", dec!(8.00)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let order = order_service::checkout(&state, &alice).await?.data.unwrap();

    let err = order_service::get_order(&state, &bob, order.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let seen = order_service::get_order(&state, &admin, order.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(seen.order.id, order.order.id);

    Ok(())
}

#[tokio::test]
async fn cancel_is_pending_only() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let movie_id = seed_movie(&state, "Brazil", dec!(6.00)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let order = order_service::checkout(&state, &alice).await?.data.unwrap();

    let payload = succeeded_event(order.order.id);
    let signature = sign_webhook(&payload);
    payment_service::handle_webhook(&state, &payload, Some(&signature)).await?;

    let err = order_service::cancel_order(&state, &alice, order.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn cancel_refused_once_payment_intent_exists() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let movie_id = seed_movie(&state, "Memento", dec!(6.50)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let order = order_service::checkout(&state, &alice).await?.data.unwrap();

    // A client_secret is out in the wild; the charge can still settle.
    payment_service::create_payment(
        &state,
        &alice,
        CreatePaymentRequest {
            order_id: order.order.id,
        },
    )
    .await?;

    let err = order_service::cancel_order(&state, &alice, order.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // The order stayed pending, so a late settlement reconciles cleanly.
    let payload = succeeded_event(order.order.id);
    let signature = sign_webhook(&payload);
    payment_service::handle_webhook(&state, &payload, Some(&signature)).await?;

    let paid = Orders::find_by_id(order.order.id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid.as_str());

    Ok(())
}

#[tokio::test]
async fn failed_webhook_cancels_pending_payment() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let movie_id = seed_movie(&state, "Solaris", dec!(3.00)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let order = order_service::checkout(&state, &alice).await?.data.unwrap();

    payment_service::create_payment(
        &state,
        &alice,
        CreatePaymentRequest {
            order_id: order.order.id,
        },
    )
    .await?;

    let payload = serde_json::json!({
        "type": "payment_intent.payment_failed",
        "data": { "object": { "id": "pi_test", "metadata": { "order_id": order.order.id.to_string() } } }
    })
    .to_string()
    .into_bytes();
    let signature = sign_webhook(&payload);

    let err = payment_service::handle_webhook(&state, &payload, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.order.id))
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Cancelled.as_str());

    // The order is untouched; the user can retry with another method.
    let reloaded = Orders::find_by_id(order.order.id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Pending.as_str());

    Ok(())
}

#[tokio::test]
async fn move_pending_order_back_to_cart() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let movie_id = seed_movie(&state, "Gattaca", dec!(4.00)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id }).await?;
    let order = order_service::checkout(&state, &alice).await?.data.unwrap();

    order_service::move_order_to_cart(&state, &alice, order.order.id).await?;

    let view = cart_service::view_cart(&state, &alice).await?.data.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].movie.id, movie_id);

    assert!(
        Orders::find_by_id(order.order.id)
            .one(&state.orm)
            .await?
            .is_none(),
        "order should be deleted after moving back to cart"
    );

    Ok(())
}

#[tokio::test]
async fn webhook_rejects_bad_signature() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let payload = succeeded_event(Uuid::new_v4());

    let err = payment_service::handle_webhook(&state, &payload, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = payment_service::handle_webhook(&state, &payload, Some("t=0,v1=deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    Ok(())
}

#[tokio::test]
async fn pay_all_covers_every_pending_order() -> anyhow::Result<()> {
    let Some((_guard, state)) = setup_state().await? else {
        return Ok(());
    };

    let alice = seed_user(&state, "alice@example.com", UserRole::User).await?;
    let first = seed_movie(&state, "Dune", dec!(10.00)).await?;
    let second = seed_movie(&state, "Arrival", dec!(5.50)).await?;

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id: first }).await?;
    let order_a = order_service::checkout(&state, &alice).await?.data.unwrap();

    cart_service::add_to_cart(&state, &alice, AddToCartRequest { movie_id: second }).await?;
    let order_b = order_service::checkout(&state, &alice).await?.data.unwrap();

    payment_service::pay_all(&state, &alice).await?;

    let payments = Payments::find()
        .filter(PaymentCol::UserId.eq(alice.user_id))
        .all(&state.orm)
        .await?;
    assert_eq!(payments.len(), 2);
    assert!(payments.iter().all(|p| p.status == PaymentStatus::Pending.as_str()));

    // Both orders settle from the one multi-order event.
    let order_ids = vec![order_a.order.id, order_b.order.id];
    let payload = serde_json::json!({
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_multi", "metadata": {
            "order_ids": serde_json::to_string(&order_ids)?
        } } }
    })
    .to_string()
    .into_bytes();
    let signature = sign_webhook(&payload);
    payment_service::handle_webhook(&state, &payload, Some(&signature)).await?;

    for order_id in order_ids {
        let order = Orders::find_by_id(order_id).one(&state.orm).await?.unwrap();
        assert_eq!(order.status, OrderStatus::Paid.as_str());
    }

    Ok(())
}
