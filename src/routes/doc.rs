use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        accounts::{
            LoginResponse, MessageResponse, RefreshTokenResponse, RegisterResponse,
        },
        cart::{AdminCartList, AdminCartView, CartItemDto, CartView},
        movies::MovieList,
        orders::{OrderList, OrderWithItems},
        payments::{CreatePaymentResponse, PaymentList},
    },
    models::{CartItem, Movie, Order, OrderItem, Payment},
    response::{ApiResponse, Meta},
    routes::{accounts, carts, health, movies as movie_routes, orders, params, payments},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        accounts::register,
        accounts::activate,
        accounts::resend_activation,
        accounts::login,
        accounts::refresh,
        accounts::logout,
        accounts::password_reset_request,
        accounts::password_reset_complete,
        accounts::change_password,
        movie_routes::list_movies,
        movie_routes::get_movie,
        movie_routes::create_movie,
        movie_routes::update_movie,
        carts::view_cart,
        carts::add_to_cart,
        carts::remove_from_cart,
        carts::clear_cart,
        carts::pay_all,
        carts::list_all_carts,
        orders::list_orders,
        orders::checkout,
        orders::list_all_orders,
        orders::get_order,
        orders::cancel_order,
        orders::move_order_to_cart,
        payments::create_payment,
        payments::stripe_webhook,
        payments::list_payments,
        payments::list_moderator_payments
    ),
    components(
        schemas(
            Movie,
            CartItem,
            Order,
            OrderItem,
            Payment,
            RegisterResponse,
            LoginResponse,
            RefreshTokenResponse,
            MessageResponse,
            CartItemDto,
            CartView,
            AdminCartView,
            AdminCartList,
            MovieList,
            OrderList,
            OrderWithItems,
            CreatePaymentResponse,
            PaymentList,
            params::Pagination,
            params::OrderListQuery,
            params::AdminOrderListQuery,
            params::ModeratorPaymentQuery,
            Meta,
            ApiResponse<Movie>,
            ApiResponse<CartView>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<PaymentList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Accounts", description = "Registration, activation and token endpoints"),
        (name = "Movies", description = "Movie catalogue endpoints"),
        (name = "Carts", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payments", description = "Payment and webhook endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
