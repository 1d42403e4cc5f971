use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::actions;
use crate::payment_gateway::{PaymentGateway, StripeGateway};
use crate::reconciler::Reconciler;
use crate::stripe_client::StripeConfig;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub stripe_config: Option<StripeConfig>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
}

impl AppState {
    pub fn new(pool: PgPool, stripe_config: Option<StripeConfig>) -> Self {
        let gateway: Option<Arc<dyn PaymentGateway>> = stripe_config
            .clone()
            .map(|config| Arc::new(StripeGateway::new(config)) as Arc<dyn PaymentGateway>);

        Self {
            pool,
            stripe_config,
            gateway,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.pool.clone(), self.gateway.clone())
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

// Middleware to capture HTTP errors to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let status = response.status();
        error!("HTTP {} error on {} {}", status.as_u16(), method, uri);

        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.url", uri.to_string());
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });

        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, uri),
            sentry::Level::Error,
        );
    }

    response
}

pub fn api_router(app_state: AppState) -> Router {
    Router::new()
        // Authentication
        .route("/auth/register", post(actions::register_user))
        .route("/auth/login", post(actions::login_user))
        .route("/auth/me", get(actions::get_current_user))
        // Events
        .route("/events", get(actions::list_events))
        .route("/events", post(actions::create_event))
        .route("/events/{id}", get(actions::get_event))
        .route("/events/{id}", put(actions::update_event))
        .route("/events/{id}", delete(actions::delete_event))
        .route("/events/{id}/register", post(actions::register_for_event))
        .route(
            "/events/{id}/registrations",
            get(actions::list_event_registrations),
        )
        // Products
        .route("/products", get(actions::list_products))
        .route("/products", post(actions::create_product))
        .route("/products/{id}", get(actions::get_product))
        .route("/products/{id}", put(actions::update_product))
        .route("/products/{id}", delete(actions::deactivate_product))
        .route("/products/{id}/purchase", post(actions::purchase_product))
        // Orders and payment confirmation
        .route("/orders/{id}", get(actions::get_order))
        .route("/orders/{id}/cancel", post(actions::cancel_order))
        .route("/orders/{id}/checkout", post(actions::checkout_order))
        .route("/orders/{id}/verify", post(actions::verify_order))
        // Member self-service
        .route("/me/membership", get(actions::get_my_membership))
        .route("/me/orders", get(actions::list_my_orders))
        .route("/me/tickets", get(actions::list_my_tickets))
        .route("/me/payments", get(actions::list_my_payments))
        .route("/gift-codes/redeem", post(actions::redeem_gift_code))
        // Contact
        .route("/contact", post(actions::submit_contact_message))
        // Stripe webhook ingress
        .route("/stripe/webhooks", post(actions::handle_webhook))
        // Admin
        .route("/admin/dashboard", get(actions::get_dashboard_stats))
        .route("/admin/payments", get(actions::list_payments))
        .route("/admin/messages", get(actions::list_contact_messages))
        .route(
            "/admin/messages/{id}/read",
            post(actions::mark_message_read),
        )
        .route("/admin/tickets/{code}/use", post(actions::use_ticket))
        .with_state(app_state)
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    pool: PgPool,
    stripe_config: Option<StripeConfig>,
) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);

    let app_state = AppState::new(pool, stripe_config);

    let cors_layer = CorsLayer::permissive();

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/data", api_router(app_state))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app).await?;

    Ok(())
}
