use super::common::{created_response, map_service_error, success_response, validate_input};
use crate::{
    auth::AuthRouterExt,
    entities::user::UserRole,
    errors::ApiError,
    handlers::AppState,
    services::templates::{AddQuestionRequest, CreateTemplateRequest},
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateDeleted {
    pub template_id: i32,
    /// Tests kept with no template
    pub tests_detached: u64,
}

pub fn template_routes() -> Router<Arc<AppState>> {
    let read = Router::new()
        .route("/test-templates", get(list_templates))
        .route("/test-templates/{id}", get(get_template))
        .with_roles(&[UserRole::Admin, UserRole::Tester]);

    let manage = Router::new()
        .route("/test-templates", post(create_template))
        .route("/test-templates/{id}", delete(delete_template))
        .route("/test-templates/{id}/questions", post(add_question))
        .with_roles(&[UserRole::Admin]);

    read.merge(manage)
}

#[utoipa::path(
    get,
    path = "/api/v1/test-templates",
    responses(
        (status = 200, description = "All templates by name", body = [crate::entities::test_template::Model])
    ),
    security(("bearer_auth" = [])),
    tag = "test-templates"
)]
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let templates = state
        .services
        .templates
        .list_templates()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(templates))
}

/// Template with its questions in display order
#[utoipa::path(
    get,
    path = "/api/v1/test-templates/{id}",
    params(("id" = i32, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template", body = crate::services::templates::TemplateDetail),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "test-templates"
)]
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .services
        .templates
        .get_template_with_questions(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(detail))
}

#[utoipa::path(
    post,
    path = "/api/v1/test-templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = crate::services::templates::TemplateDetail),
        (status = 400, description = "Invalid name or questions", body = crate::errors::ErrorResponse),
        (status = 409, description = "Name already used", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "test-templates"
)]
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTemplateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let detail = state
        .services
        .templates
        .create_template(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(detail))
}

#[utoipa::path(
    post,
    path = "/api/v1/test-templates/{id}/questions",
    params(("id" = i32, Path, description = "Template id")),
    request_body = AddQuestionRequest,
    responses(
        (status = 201, description = "Question appended", body = crate::entities::test_question::Model),
        (status = 404, description = "Template not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "test-templates"
)]
pub async fn add_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<AddQuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let question = state
        .services
        .templates
        .add_question(id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(question))
}

/// Delete a template and its questions; recorded tests are kept
#[utoipa::path(
    delete,
    path = "/api/v1/test-templates/{id}",
    params(("id" = i32, Path, description = "Template id")),
    responses(
        (status = 200, description = "Deleted", body = TemplateDeleted),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "test-templates"
)]
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let tests_detached = state
        .services
        .templates
        .delete_template(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(TemplateDeleted {
        template_id: id,
        tests_detached,
    }))
}
