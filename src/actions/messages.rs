use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::messages::NewContactMessage;
use crate::messages_repo::MessagesRepository;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error};

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct MessagesQuery {
    #[serde(default)]
    pub unread_only: bool,
}

pub async fn submit_contact_message(
    State(state): State<AppState>,
    Json(payload): Json<ContactRequest>,
) -> impl IntoResponse {
    if payload.name.trim().is_empty()
        || payload.email.trim().is_empty()
        || payload.body.trim().is_empty()
    {
        return json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Name, email and message are required",
        )
        .into_response();
    }

    let messages_repo = MessagesRepository::new(state.pool);

    let new_message = NewContactMessage {
        name: payload.name.trim().to_string(),
        email: payload.email.trim().to_lowercase(),
        subject: payload.subject,
        body: payload.body,
    };

    match messages_repo.create(new_message).await {
        Ok(message) => (StatusCode::CREATED, Json(DataResponse { data: message })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to store contact message");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message").into_response()
        }
    }
}

pub async fn list_contact_messages(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<MessagesQuery>,
) -> impl IntoResponse {
    let messages_repo = MessagesRepository::new(state.pool);

    match messages_repo.list(query.unread_only).await {
        Ok(messages) => Json(DataListResponse { data: messages }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list contact messages");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list messages")
                .into_response()
        }
    }
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(message_id): Path<Uuid>,
) -> impl IntoResponse {
    let messages_repo = MessagesRepository::new(state.pool);

    match messages_repo.mark_read(message_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "Message not found").into_response(),
        Err(e) => {
            error!(error = %e, "Failed to mark message read");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to mark message read",
            )
            .into_response()
        }
    }
}
