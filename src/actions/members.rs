use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::error;

use crate::auth::AuthUser;
use crate::memberships::MembershipStatus;
use crate::memberships_repo::MembershipsRepository;
use crate::orders_repo::OrdersRepository;
use crate::payments_repo::PaymentsRepository;
use crate::tickets_repo::TicketsRepository;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, domain_error_response, json_error};

#[derive(Debug, Deserialize)]
pub struct RedeemGiftRequest {
    pub code: String,
}

/// The caller's membership, or an empty `none` record if they never held
/// one.
pub async fn get_my_membership(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> impl IntoResponse {
    let memberships_repo = MembershipsRepository::new(state.pool);

    match memberships_repo.get_by_user_id(user.id).await {
        Ok(Some(membership)) => Json(DataResponse { data: membership }).into_response(),
        Ok(None) => Json(DataResponse {
            data: serde_json::json!({
                "user_id": user.id,
                "status": MembershipStatus::None,
            }),
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to get membership");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get membership")
                .into_response()
        }
    }
}

pub async fn list_my_orders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool);

    match orders_repo.list_by_user(user.id).await {
        Ok(orders) => Json(DataListResponse { data: orders }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list orders");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list orders").into_response()
        }
    }
}

pub async fn list_my_tickets(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> impl IntoResponse {
    let tickets_repo = TicketsRepository::new(state.pool);

    match tickets_repo.list_by_user(user.id).await {
        Ok(tickets) => Json(DataListResponse { data: tickets }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list tickets");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list tickets").into_response()
        }
    }
}

pub async fn list_my_payments(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> impl IntoResponse {
    let payments_repo = PaymentsRepository::new(state.pool);

    match payments_repo.get_by_user_id(user.id).await {
        Ok(payments) => Json(DataListResponse { data: payments }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list payments");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list payments")
                .into_response()
        }
    }
}

/// Redeem a gift code. Single use; the code's order row is flipped to
/// used inside a row-locked transaction so two redeemers cannot both win.
pub async fn redeem_gift_code(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Json(payload): Json<RedeemGiftRequest>,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool);

    let code = payload.code.trim().to_uppercase();
    match orders_repo.redeem_gift_code(&code).await {
        Ok(order) => Json(DataResponse { data: order }).into_response(),
        Err(e) => domain_error_response(e),
    }
}
