use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Batchtrace API",
        version = "1.0.0",
        description = r#"
# Batchtrace Manufacturing Traceability API

Issues production batches with unique per-unit barcodes and records quality
tests against those units.

## Barcodes

Every barcode is `<SKU code><suffix>`. Suffixes run `A001` … `A999`, `B001` …
`Z999`, `AA001` … and never repeat for a SKU. Batch creation is all or
nothing: a response either contains every requested barcode or nothing was
written.

A `409` whose body carries `"retryable": true` means another issuance claimed
part of the range first; repeat the identical request.

## Authentication

Sign in at `/api/v1/auth/login` and send the returned token:

```
Authorization: Bearer <token>
```

## Pagination

List endpoints accept `page` (default 1) and `per_page` (capped by the
server) and answer with `{ "data": [...], "pagination": {...} }`.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "auth", description = "Sign-in"),
        (name = "users", description = "Operator accounts"),
        (name = "skus", description = "Products and their barcode prefixes"),
        (name = "batches", description = "Batch issuance, barcodes and labels"),
        (name = "test-templates", description = "Checklists used when testing a unit"),
        (name = "tests", description = "Quality tests and reports"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::auth::login,
        crate::handlers::auth::me,
        crate::handlers::users::create_user,
        crate::handlers::users::list_users,
        crate::handlers::skus::list_skus,
        crate::handlers::skus::get_sku,
        crate::handlers::skus::create_sku,
        crate::handlers::skus::delete_sku,
        crate::handlers::batches::create_batch,
        crate::handlers::batches::list_batches,
        crate::handlers::batches::get_batch,
        crate::handlers::batches::list_batch_barcodes,
        crate::handlers::batches::delete_batch,
        crate::handlers::batches::batch_labels,
        crate::handlers::batches::barcode_image,
        crate::handlers::templates::list_templates,
        crate::handlers::templates::get_template,
        crate::handlers::templates::create_template,
        crate::handlers::templates::add_question,
        crate::handlers::templates::delete_template,
        crate::handlers::quality_tests::record_test,
        crate::handlers::quality_tests::list_tests,
        crate::handlers::quality_tests::get_test,
        crate::handlers::quality_tests::update_test_status,
        crate::handlers::quality_tests::test_report,
        crate::handlers::health::health_check,
        crate::handlers::health::api_status,
    ),
    components(
        schemas(
            crate::handlers::common::PaginationMeta,
            crate::handlers::auth::LoginRequest,
            crate::auth::TokenResponse,
            crate::auth::AuthUser,
            crate::handlers::users::User,
            crate::services::users::CreateUserRequest,
            crate::services::skus::CreateSkuRequest,
            crate::handlers::batches::CreateBatchRequest,
            crate::handlers::batches::BatchDeleted,
            crate::services::batches::BatchSpec,
            crate::services::batches::IssuedBatch,
            crate::services::batches::BatchSummary,
            crate::services::templates::CreateTemplateRequest,
            crate::services::templates::AddQuestionRequest,
            crate::services::templates::TemplateDetail,
            crate::handlers::templates::TemplateDeleted,
            crate::services::quality_tests::RecordTestRequest,
            crate::services::quality_tests::AnswerInput,
            crate::services::quality_tests::TestDetail,
            crate::services::quality_tests::TestSummary,
            crate::services::quality_tests::TestCounts,
            crate::handlers::quality_tests::UpdateStatusRequest,
            crate::handlers::quality_tests::TestListResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
