use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::DomainError;
use crate::events_repo::EventsRepository;
use crate::orders::{Order, OrderStatus};
use crate::orders_repo::OrdersRepository;
use crate::payment_gateway::CheckoutRequest;
use crate::products_repo::ProductsRepository;
use crate::reconciler::{ReconcileTrigger, Reconciler};
use crate::web::AppState;

use super::{DataResponse, domain_error_response, json_error};

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub order: Order,
}

pub async fn get_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool);

    match orders_repo.get_for_user(order_id, user.id, user.is_admin).await {
        Ok(order) => Json(DataResponse { data: order }).into_response(),
        Err(e) => domain_error_response(e),
    }
}

pub async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool);

    if let Err(e) = orders_repo.get_for_user(order_id, user.id, user.is_admin).await {
        return domain_error_response(e);
    }

    match orders_repo.cancel(order_id).await {
        Ok(order) => Json(DataResponse { data: order }).into_response(),
        Err(e) => domain_error_response(e),
    }
}

/// Open a hosted checkout session for a pending order and hand the URL
/// back to the client.
pub async fn checkout_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse {
    let Some(gateway) = state.gateway.clone() else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Payments are not configured",
        )
        .into_response();
    };

    let orders_repo = OrdersRepository::new(state.pool.clone());

    let order = match orders_repo.get_for_user(order_id, user.id, user.is_admin).await {
        Ok(order) => order,
        Err(e) => return domain_error_response(e),
    };

    if order.status != OrderStatus::Pending {
        return domain_error_response(DomainError::Conflict(format!(
            "order is {:?} and cannot be checked out",
            order.status
        )));
    }
    if order.amount_cents == 0 {
        return domain_error_response(DomainError::Conflict(
            "free orders do not go through checkout".to_string(),
        ));
    }

    let (name, description) = match order_line_label(&state, &order).await {
        Ok(label) => label,
        Err(e) => return domain_error_response(e),
    };

    let base_url =
        std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let success_url = format!("{}/checkout/success?order_id={}", base_url, order.id);
    let cancel_url = format!("{}/checkout/cancel?order_id={}", base_url, order.id);

    let mut metadata = HashMap::new();
    metadata.insert("order_id".to_string(), order.id.to_string());
    metadata.insert("user_id".to_string(), order.user_id.to_string());

    let session = match gateway
        .create_checkout_session(CheckoutRequest {
            name,
            description,
            unit_amount_cents: order.amount_cents / order.quantity.max(1),
            quantity: order.quantity.max(1) as u32,
            success_url,
            cancel_url,
            metadata,
        })
        .await
    {
        Ok(session) => session,
        Err(e) => return domain_error_response(e),
    };

    match orders_repo
        .attach_stripe_session(order.id, &session.session_id)
        .await
    {
        Ok(order) => Json(DataResponse {
            data: CheckoutResponse {
                checkout_url: session.url,
                order,
            },
        })
        .into_response(),
        Err(e) => domain_error_response(e),
    }
}

/// Post-redirect verification. The client claims its payment went through;
/// the reconciler asks the processor and confirms only what it vouches for.
pub async fn verify_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool.clone());

    if let Err(e) = orders_repo.get_for_user(order_id, user.id, user.is_admin).await {
        return domain_error_response(e);
    }

    let reconciler: Reconciler = state.reconciler();
    match reconciler
        .reconcile(order_id, ReconcileTrigger::ClientVerify)
        .await
    {
        Ok(outcome) => Json(DataResponse { data: outcome }).into_response(),
        Err(e) => domain_error_response(e),
    }
}

async fn order_line_label(
    state: &AppState,
    order: &Order,
) -> Result<(String, Option<String>), DomainError> {
    if let Some(event_id) = order.event_id {
        let event = EventsRepository::new(state.pool.clone())
            .get_by_id(event_id)
            .await?
            .ok_or(DomainError::NotFound("event"))?;
        return Ok((event.title, event.description));
    }
    if let Some(product_id) = order.product_id {
        let product = ProductsRepository::new(state.pool.clone())
            .get_by_id(product_id)
            .await?
            .ok_or(DomainError::NotFound("product"))?;
        return Ok((product.name, product.description));
    }
    Err(DomainError::NotFound("order target"))
}
