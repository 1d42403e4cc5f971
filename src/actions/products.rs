use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::orders_repo::OrdersRepository;
use crate::products_repo::ProductsRepository;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, domain_error_response, json_error};

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
}

fn default_quantity() -> i32 {
    1
}

pub async fn list_products(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
) -> impl IntoResponse {
    let products_repo = ProductsRepository::new(state.pool);
    let include_inactive = user.map(|u| u.is_admin).unwrap_or(false);

    match products_repo.list(include_inactive).await {
        Ok(products) => Json(DataListResponse { data: products }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list products");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list products")
                .into_response()
        }
    }
}

/// Fetch one product, addressed by slug or by id.
pub async fn get_product(
    State(state): State<AppState>,
    Path(slug_or_id): Path<String>,
) -> impl IntoResponse {
    let products_repo = ProductsRepository::new(state.pool);

    let lookup = match Uuid::parse_str(&slug_or_id) {
        Ok(id) => products_repo.get_by_id(id).await,
        Err(_) => products_repo.get_by_slug(&slug_or_id).await,
    };

    match lookup {
        Ok(Some(product)) if product.is_active => {
            Json(DataResponse { data: product }).into_response()
        }
        Ok(_) => json_error(StatusCode::NOT_FOUND, "Product not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to get product");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get product").into_response()
        }
    }
}

/// Start a purchase: creates a pending order for the product. The client
/// takes the order through `/orders/{id}/checkout` next.
pub async fn purchase_product(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<PurchaseRequest>,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool);

    match orders_repo
        .create_product_order(
            user.id,
            product_id,
            payload.quantity,
            payload.recipient_name,
            payload.recipient_email,
        )
        .await
    {
        Ok(order) => (StatusCode::CREATED, Json(DataResponse { data: order })).into_response(),
        Err(e) => domain_error_response(e),
    }
}
