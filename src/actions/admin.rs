use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::memberships_repo::MembershipsRepository;
use crate::orders_repo::OrdersRepository;
use crate::payments_repo::PaymentsRepository;
use crate::products::{NewProduct, ProductCategory, ProductChanges};
use crate::products_repo::ProductsRepository;
use crate::tickets_repo::TicketsRepository;
use crate::users_repo::UsersRepository;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error};

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub active_memberships: i64,
    pub paid_orders: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaymentsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub price_cents: i32,
    pub duration_months: Option<i32>,
    pub events_included: Option<i32>,
    pub validity_months: Option<i32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub price_cents: Option<i32>,
    pub duration_months: Option<Option<i32>>,
    pub events_included: Option<Option<i32>>,
    pub validity_months: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

pub async fn get_dashboard_stats(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> impl IntoResponse {
    let users_repo = UsersRepository::new(state.pool.clone());
    let memberships_repo = MembershipsRepository::new(state.pool.clone());
    let orders_repo = OrdersRepository::new(state.pool.clone());
    let payments_repo = PaymentsRepository::new(state.pool);

    let stats = async {
        Ok::<DashboardStats, anyhow::Error>(DashboardStats {
            total_users: users_repo.count().await?,
            active_memberships: memberships_repo.count_active().await?,
            paid_orders: orders_repo.count_paid().await?,
            revenue_cents: payments_repo.total_amount_cents().await?,
        })
    }
    .await;

    match stats {
        Ok(stats) => Json(DataResponse { data: stats }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to compute dashboard stats");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to compute dashboard stats",
            )
            .into_response()
        }
    }
}

pub async fn list_payments(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PaymentsQuery>,
) -> impl IntoResponse {
    let payments_repo = PaymentsRepository::new(state.pool);

    match payments_repo.list(query.limit.clamp(1, 500)).await {
        Ok(payments) => Json(DataListResponse { data: payments }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list payments");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list payments")
                .into_response()
        }
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<CreateProductRequest>,
) -> impl IntoResponse {
    let products_repo = ProductsRepository::new(state.pool);

    let new_product = NewProduct {
        name: payload.name,
        slug: payload.slug,
        description: payload.description,
        category: payload.category,
        price_cents: payload.price_cents,
        duration_months: payload.duration_months,
        events_included: payload.events_included,
        validity_months: payload.validity_months,
        is_active: payload.is_active,
    };

    match products_repo.create(new_product).await {
        Ok(product) => (StatusCode::CREATED, Json(DataResponse { data: product })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to create product");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create product",
            )
            .into_response()
        }
    }
}

pub async fn update_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateProductRequest>,
) -> impl IntoResponse {
    let products_repo = ProductsRepository::new(state.pool);

    let changes = ProductChanges {
        name: payload.name,
        slug: None,
        description: payload.description,
        price_cents: payload.price_cents,
        duration_months: payload.duration_months,
        events_included: payload.events_included,
        validity_months: payload.validity_months,
        is_active: payload.is_active,
    };

    match products_repo.update(product_id, changes).await {
        Ok(Some(product)) => Json(DataResponse { data: product }).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Product not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to update product");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update product",
            )
            .into_response()
        }
    }
}

pub async fn deactivate_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(product_id): Path<Uuid>,
) -> impl IntoResponse {
    let products_repo = ProductsRepository::new(state.pool);

    match products_repo.deactivate(product_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "Product not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to deactivate product");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to deactivate product",
            )
            .into_response()
        }
    }
}

/// Door check-in: marks a ticket used. Second scan of the same code gets
/// a conflict.
pub async fn use_ticket(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(ticket_code): Path<String>,
) -> impl IntoResponse {
    let tickets_repo = TicketsRepository::new(state.pool);

    let code = ticket_code.trim().to_uppercase();
    match tickets_repo.mark_used(&code).await {
        Ok(true) => Json(DataResponse {
            data: serde_json::json!({ "ticket_code": code, "used": true }),
        })
        .into_response(),
        Ok(false) => json_error(StatusCode::CONFLICT, "Ticket not found or already used")
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to mark ticket used");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to mark ticket used",
            )
            .into_response()
        }
    }
}
