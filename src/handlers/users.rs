use super::common::{created_response, map_service_error, success_response, validate_input};
use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::user::{self, UserRole},
    errors::ApiError,
    handlers::AppState,
    services::users::CreateUserRequest,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

/// Operator account as returned by the API; never carries the password hash
#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": 4,
    "username": "lena",
    "email": "lena@example.com",
    "role": "tester",
    "is_active": true,
    "created_at": "2024-12-09T10:30:00Z"
}))]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            role: model.role,
            is_active: model.is_active,
            created_at: model.created_at,
        }
    }
}

pub fn user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .with_roles(&[UserRole::Admin])
}

/// Create an operator account
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Username taken", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    current_user: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let created = state
        .services
        .users
        .create_user(payload)
        .await
        .map_err(map_service_error)?;

    info!(created_by = %current_user.username, user_id = created.id, "user created");
    Ok(created_response(User::from(created)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "All operators by username", body = [User]),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .services
        .users
        .list_users()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(
        users.into_iter().map(User::from).collect::<Vec<_>>(),
    ))
}
