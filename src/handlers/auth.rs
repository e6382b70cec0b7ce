use super::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::{AuthRouterExt, AuthUser, TokenResponse},
    errors::{ApiError, ServiceError},
    handlers::AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

/// Login request payload
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

pub fn auth_routes() -> Router<Arc<AppState>> {
    let me = Router::new().route("/auth/me", get(me)).with_auth();

    Router::new().route("/auth/login", post(login)).merge(me)
}

/// Exchange operator credentials for a bearer token
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Malformed request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid username or password", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let user = state
        .services
        .users
        .authenticate(&payload.username, &payload.password)
        .await
        .map_err(map_service_error)?;

    let token = state
        .auth
        .generate_token(&user)
        .map_err(|e| map_service_error(ServiceError::InternalError(e.to_string())))?;

    info!(user_id = user.id, role = %user.role, "operator signed in");
    Ok(success_response(token))
}

/// The caller's identity as carried by the token
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current operator", body = AuthUser),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(user: AuthUser) -> impl IntoResponse {
    success_response(user)
}
