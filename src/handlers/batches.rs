use super::common::{
    attachment_response, created_response, map_service_error, success_response, validate_input,
    PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AuthRouterExt,
    entities::user::UserRole,
    errors::{ApiError, ServiceError},
    handlers::AppState,
    reports::{RenderedDocument, PNG_CONTENT_TYPE},
    services::batches::{BatchFilter, BatchSpec, IssueBatchRequest},
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Batch creation form. Any `prefix` the client sends is ignored: barcodes
/// always carry the SKU code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "sku_id": 1,
    "batch_date": "2024-11-05",
    "quantity": 250,
    "device_name": "PowerCell 5",
    "battery": "LiFePO4",
    "capacity": "5kWh"
}))]
pub struct CreateBatchRequest {
    pub sku_id: i32,
    pub batch_date: NaiveDate,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(flatten)]
    #[validate]
    pub spec: BatchSpec,
}

impl From<CreateBatchRequest> for IssueBatchRequest {
    fn from(req: CreateBatchRequest) -> Self {
        IssueBatchRequest {
            sku_id: req.sku_id,
            batch_date: req.batch_date,
            quantity: req.quantity,
            spec: req.spec,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct BarcodeSearch {
    /// Case-insensitive substring of the sequence number
    pub barcode_number: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LabelQuery {
    /// Render only this barcode of the batch
    pub barcode_id: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchDeleted {
    pub batch_id: i32,
    pub barcodes_removed: u64,
}

pub fn batch_routes() -> Router<Arc<AppState>> {
    let read = Router::new()
        .route("/batches", get(list_batches))
        .route("/batches/{id}", get(get_batch))
        .route("/batches/{id}/barcodes", get(list_batch_barcodes))
        .route("/barcodes/{sequence_number}/image.png", get(barcode_image))
        .with_auth();

    let issue = Router::new()
        .route("/batches", post(create_batch))
        .route("/batches/{id}/labels.pdf", get(batch_labels))
        .with_roles(&[UserRole::Admin, UserRole::Tester]);

    let manage = Router::new()
        .route("/batches/{id}", delete(delete_batch))
        .with_roles(&[UserRole::Admin]);

    read.merge(issue).merge(manage)
}

/// Issue a batch and its barcodes
#[utoipa::path(
    post,
    path = "/api/v1/batches",
    request_body = CreateBatchRequest,
    responses(
        (status = 201, description = "Batch issued", body = crate::services::batches::IssuedBatch),
        (status = 400, description = "Invalid quantity or spec", body = crate::errors::ErrorResponse),
        (status = 404, description = "SKU not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Barcode range claimed concurrently; retryable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let issued = state
        .services
        .batches
        .issue_batch(payload.into())
        .await
        .map_err(map_service_error)?;
    Ok(created_response(issued))
}

/// List batches, newest production date first
#[utoipa::path(
    get,
    path = "/api/v1/batches",
    params(BatchFilter, PaginationParams),
    responses(
        (status = 200, description = "Page of batches")
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<BatchFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = pagination.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let batches = state
        .services
        .batches
        .list_batches(filter, page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::from(batches)))
}

#[utoipa::path(
    get,
    path = "/api/v1/batches/{id}",
    params(("id" = i32, Path, description = "Batch id")),
    responses(
        (status = 200, description = "Batch", body = crate::services::batches::BatchSummary),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .services
        .batches
        .get_batch(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(batch))
}

/// Barcodes of a batch in issue order
#[utoipa::path(
    get,
    path = "/api/v1/batches/{id}/barcodes",
    params(("id" = i32, Path, description = "Batch id"), BarcodeSearch, PaginationParams),
    responses(
        (status = 200, description = "Page of barcodes"),
        (status = 404, description = "Batch not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn list_batch_barcodes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(search): Query<BarcodeSearch>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = pagination.resolve(
        state.config.barcode_page_size,
        state.config.api_max_page_size,
    );
    let barcodes = state
        .services
        .batches
        .list_barcodes(id, search.barcode_number, page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::from(barcodes)))
}

/// Delete a batch with its barcodes and their tests
#[utoipa::path(
    delete,
    path = "/api/v1/batches/{id}",
    params(("id" = i32, Path, description = "Batch id")),
    responses(
        (status = 200, description = "Deleted", body = BatchDeleted),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn delete_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let barcodes_removed = state
        .services
        .batches
        .delete_batch(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(BatchDeleted {
        batch_id: id,
        barcodes_removed,
    }))
}

/// Printable label sheet for a batch, or for one of its barcodes
#[utoipa::path(
    get,
    path = "/api/v1/batches/{id}/labels.pdf",
    params(("id" = i32, Path, description = "Batch id"), LabelQuery),
    responses(
        (status = 200, description = "PDF label sheet", content_type = "application/pdf"),
        (status = 404, description = "Batch or barcode not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Rendering failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn batch_labels(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(query): Query<LabelQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let batches = &state.services.batches;
    let batch = batches.get_batch(id).await.map_err(map_service_error)?.batch;
    let barcodes = match query.barcode_id {
        Some(barcode_id) => vec![batches
            .get_barcode(id, barcode_id)
            .await
            .map_err(map_service_error)?],
        None => batches.all_barcodes(id).await.map_err(map_service_error)?,
    };

    let renderer = state.services.report_renderer.clone();
    let document = render_blocking(move || renderer.batch_labels(&batch, &barcodes)).await?;
    Ok(attachment_response(document))
}

/// Code128 image of a single barcode
#[utoipa::path(
    get,
    path = "/api/v1/barcodes/{sequence_number}/image.png",
    params(("sequence_number" = String, Path, description = "Full sequence number, e.g. BT100A001")),
    responses(
        (status = 200, description = "PNG image", content_type = "image/png"),
        (status = 404, description = "Unknown sequence number", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "batches"
)]
pub async fn barcode_image(
    State(state): State<Arc<AppState>>,
    Path(sequence_number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let barcode = state
        .services
        .batches
        .find_barcode_by_sequence(&sequence_number)
        .await
        .map_err(map_service_error)?;

    let renderer = state.services.barcode_renderer.clone();
    let document = render_blocking(move || {
        renderer
            .render_png(&barcode.sequence_number)
            .map(|bytes| RenderedDocument {
                file_name: format!("{}.png", barcode.sequence_number),
                content_type: PNG_CONTENT_TYPE,
                bytes,
            })
    })
    .await?;
    Ok(attachment_response(document))
}

/// Run a renderer off the async workers
pub(crate) async fn render_blocking<F>(render: F) -> Result<RenderedDocument, ApiError>
where
    F: FnOnce() -> Result<RenderedDocument, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(render)
        .await
        .map_err(|e| map_service_error(ServiceError::InternalError(e.to_string())))?
        .map_err(map_service_error)
}
