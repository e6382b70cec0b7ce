use super::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
    PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AuthRouterExt,
    entities::user::UserRole,
    errors::ApiError,
    handlers::AppState,
    services::skus::{CreateSkuRequest, SkuFilter},
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

pub fn sku_routes() -> Router<Arc<AppState>> {
    let read = Router::new()
        .route("/skus", get(list_skus))
        .route("/skus/{id}", get(get_sku))
        .with_auth();

    let manage = Router::new()
        .route("/skus", post(create_sku))
        .route("/skus/{id}", delete(delete_sku))
        .with_roles(&[UserRole::Admin]);

    read.merge(manage)
}

/// List SKUs ordered by code
#[utoipa::path(
    get,
    path = "/api/v1/skus",
    params(SkuFilter, PaginationParams),
    responses(
        (status = 200, description = "Page of SKUs"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "skus"
)]
pub async fn list_skus(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SkuFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = pagination.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let skus = state
        .services
        .skus
        .list_skus(filter, page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::from(skus)))
}

#[utoipa::path(
    get,
    path = "/api/v1/skus/{id}",
    params(("id" = i32, Path, description = "SKU id")),
    responses(
        (status = 200, description = "SKU", body = crate::entities::sku::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "skus"
)]
pub async fn get_sku(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let sku = state
        .services
        .skus
        .get_sku(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(sku))
}

/// Register a SKU; its code becomes the barcode prefix of every batch
#[utoipa::path(
    post,
    path = "/api/v1/skus",
    request_body = CreateSkuRequest,
    responses(
        (status = 201, description = "SKU created", body = crate::entities::sku::Model),
        (status = 400, description = "Invalid code", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already registered", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "skus"
)]
pub async fn create_sku(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSkuRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let sku = state
        .services
        .skus
        .create_sku(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(sku))
}

/// Delete a SKU with all of its batches, barcodes and tests
#[utoipa::path(
    delete,
    path = "/api/v1/skus/{id}",
    params(("id" = i32, Path, description = "SKU id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "skus"
)]
pub async fn delete_sku(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .skus
        .delete_sku(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
