use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::{AuthUser, JwtService};
use crate::users::User;
use crate::users_repo::UsersRepository;
use crate::web::AppState;

use super::json_error;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    if payload.password.len() < 8 {
        return json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Password must be at least 8 characters",
        )
        .into_response();
    }

    let users_repo = UsersRepository::new(state.pool.clone());

    if let Ok(Some(_)) = users_repo.get_by_email(&payload.email).await {
        return json_error(StatusCode::CONFLICT, "User with this email already exists")
            .into_response();
    }

    match users_repo
        .create(
            &payload.email,
            &payload.password,
            &payload.first_name,
            &payload.last_name,
        )
        .await
    {
        Ok(user) => match issue_token(&user) {
            Ok(token) => Json(LoginResponse { token, user }).into_response(),
            Err(response) => response,
        },
        Err(e) => {
            error!(error = %e, "Failed to create user");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user").into_response()
        }
    }
}

pub async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let users_repo = UsersRepository::new(state.pool);

    match users_repo
        .authenticate(&payload.email, &payload.password)
        .await
    {
        Ok(Some(user)) => match issue_token(&user) {
            Ok(token) => Json(LoginResponse { token, user }).into_response(),
            Err(response) => response,
        },
        Ok(None) => json_error(StatusCode::UNAUTHORIZED, "Invalid credentials").into_response(),
        Err(e) => {
            error!(error = %e, "Authentication error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response()
        }
    }
}

pub async fn get_current_user(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(user)
}

fn issue_token(user: &User) -> Result<String, axum::response::Response> {
    let jwt = JwtService::from_env().map_err(|e| {
        error!(error = %e, "JWT secret not configured");
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Authentication configuration error",
        )
        .into_response()
    })?;

    jwt.issue(user).map_err(|e| {
        error!(error = %e, "Failed to generate token");
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate authentication token",
        )
        .into_response()
    })
}
