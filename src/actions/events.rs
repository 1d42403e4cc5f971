use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, OptionalAuthUser};
use crate::errors::DomainError;
use crate::events::{EventChanges, EventStatus, NewEvent};
use crate::events_repo::EventsRepository;
use crate::orders::Order;
use crate::orders_repo::OrdersRepository;
use crate::reconciler::ReconcileOutcome;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, domain_error_response, json_error};

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: chrono::DateTime<chrono::Utc>,
    pub ends_at: Option<chrono::DateTime<chrono::Utc>>,
    pub capacity: Option<i32>,
    #[serde(default)]
    pub members_only: bool,
    #[serde(default)]
    pub price_cents: i32,
    #[serde(default)]
    pub status: Option<EventStatus>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub starts_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ends_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
    pub capacity: Option<Option<i32>>,
    pub members_only: Option<bool>,
    pub price_cents: Option<i32>,
    pub status: Option<EventStatus>,
    pub image_url: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct EventRegistrationRequest {
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub order: Order,
    /// Present when the event is free and the registration was confirmed
    /// on the spot.
    pub confirmed: bool,
}

pub async fn list_events(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
) -> impl IntoResponse {
    let events_repo = EventsRepository::new(state.pool);
    let include_unpublished = user.map(|u| u.is_admin).unwrap_or(false);

    match events_repo.list(include_unpublished).await {
        Ok(events) => Json(DataListResponse { data: events }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list events");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list events").into_response()
        }
    }
}

/// Fetch one event, addressed by slug or by id.
pub async fn get_event(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Path(slug_or_id): Path<String>,
) -> impl IntoResponse {
    let events_repo = EventsRepository::new(state.pool);

    let lookup = match Uuid::parse_str(&slug_or_id) {
        Ok(id) => events_repo.get_by_id(id).await,
        Err(_) => events_repo.get_by_slug(&slug_or_id).await,
    };

    match lookup {
        Ok(Some(event)) => {
            let is_admin = user.map(|u| u.is_admin).unwrap_or(false);
            if event.status != EventStatus::Published && !is_admin {
                return json_error(StatusCode::NOT_FOUND, "Event not found").into_response();
            }
            Json(DataResponse { data: event }).into_response()
        }
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Event not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to get event");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get event").into_response()
        }
    }
}

pub async fn create_event(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<CreateEventRequest>,
) -> impl IntoResponse {
    let events_repo = EventsRepository::new(state.pool);

    let new_event = NewEvent {
        title: payload.title,
        slug: payload.slug,
        description: payload.description,
        location: payload.location,
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
        capacity: payload.capacity,
        members_only: payload.members_only,
        price_cents: payload.price_cents,
        status: payload.status.unwrap_or(EventStatus::Draft),
        image_url: payload.image_url,
    };

    match events_repo.create(new_event).await {
        Ok(event) => (StatusCode::CREATED, Json(DataResponse { data: event })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to create event");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create event").into_response()
        }
    }
}

pub async fn update_event(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<UpdateEventRequest>,
) -> impl IntoResponse {
    let events_repo = EventsRepository::new(state.pool);

    let changes = EventChanges {
        title: payload.title,
        slug: None,
        description: payload.description,
        location: payload.location,
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
        capacity: payload.capacity,
        members_only: payload.members_only,
        price_cents: payload.price_cents,
        status: payload.status,
        image_url: payload.image_url,
    };

    match events_repo.update(event_id, changes).await {
        Ok(Some(event)) => Json(DataResponse { data: event }).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Event not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to update event");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update event").into_response()
        }
    }
}

pub async fn delete_event(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let events_repo = EventsRepository::new(state.pool);

    match events_repo.delete(event_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "Event not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to delete event");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete event").into_response()
        }
    }
}

/// Register the caller for an event. Paid events get a pending order to
/// run through checkout; free events confirm immediately.
pub async fn register_for_event(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<EventRegistrationRequest>,
) -> impl IntoResponse {
    let orders_repo = OrdersRepository::new(state.pool.clone());

    let order = match orders_repo
        .create_event_order(user.id, event_id, payload.quantity)
        .await
    {
        Ok(order) => order,
        Err(e) => return domain_error_response(e),
    };

    if order.amount_cents == 0 {
        let reconciler = state.reconciler();
        return match reconciler.confirm_free(order.id).await {
            Ok(ReconcileOutcome { order, .. }) => (
                StatusCode::CREATED,
                Json(DataResponse {
                    data: RegistrationResponse {
                        order,
                        confirmed: true,
                    },
                }),
            )
                .into_response(),
            Err(e) => domain_error_response(e),
        };
    }

    (
        StatusCode::CREATED,
        Json(DataResponse {
            data: RegistrationResponse {
                order,
                confirmed: false,
            },
        }),
    )
        .into_response()
}

pub async fn list_event_registrations(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let events_repo = EventsRepository::new(state.pool.clone());
    let orders_repo = OrdersRepository::new(state.pool);

    match events_repo.get_by_id(event_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return domain_error_response(DomainError::NotFound("event")),
        Err(e) => return domain_error_response(e.into()),
    }

    match orders_repo.list_by_event(event_id).await {
        Ok(orders) => Json(DataListResponse { data: orders }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list registrations");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list registrations",
            )
            .into_response()
        }
    }
}
