use crate::{
    db::{self, DbPool},
    entities::{barcode, batch, quality_test, sku, test_answer},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{contains_ignore_case, non_blank, Page, PageRequest};

/// Input for creating a SKU
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateSkuRequest {
    /// Becomes the prefix of every barcode issued for this SKU
    #[validate(length(min = 1, max = 10))]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SkuFilter {
    /// Case-insensitive match on the code or description
    pub search: Option<String>,
}

/// Service for managing SKUs
#[derive(Clone)]
pub struct SkuService {
    db_pool: Arc<DbPool>,
}

impl SkuService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Creates a SKU. Codes are unique and compared exactly.
    #[instrument(skip(self))]
    pub async fn create_sku(&self, request: CreateSkuRequest) -> Result<sku::Model, ServiceError> {
        let request = CreateSkuRequest {
            code: request.code.trim().to_string(),
            description: request.description,
        };
        request.validate()?;
        if request.code.chars().any(char::is_whitespace) {
            return Err(ServiceError::ValidationError(
                "SKU code must not contain whitespace".to_string(),
            ));
        }

        let code = request.code.clone();
        let created = sku::ActiveModel {
            code: Set(request.code),
            description: Set(request.description),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            ServiceError::on_unique_violation(e, || {
                ServiceError::Conflict(format!("SKU code '{}' already exists", code))
            })
        })?;

        info!(sku_id = created.id, code = %created.code, "SKU created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_sku(&self, id: i32) -> Result<sku::Model, ServiceError> {
        sku::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SKU {} not found", id)))
    }

    /// Exact, case-sensitive code lookup
    #[instrument(skip(self))]
    pub async fn get_sku_by_code(&self, code: &str) -> Result<sku::Model, ServiceError> {
        let code = code.trim();
        sku::Entity::find()
            .filter(sku::Column::Code.eq(code))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SKU '{}' not found", code)))
    }

    /// Lists SKUs ordered by code
    #[instrument(skip(self))]
    pub async fn list_skus(
        &self,
        filter: SkuFilter,
        page: PageRequest,
    ) -> Result<Page<sku::Model>, ServiceError> {
        let mut query = sku::Entity::find();
        if let Some(search) = non_blank(&filter.search) {
            query = query.filter(
                contains_ignore_case(sku::Column::Code, search)
                    .or(contains_ignore_case(sku::Column::Description, search)),
            );
        }

        let paginator = query
            .order_by_asc(sku::Column::Code)
            .paginate(&*self.db_pool, page.per_page);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.index()).await?;

        Ok(Page::new(items, total, page))
    }

    /// Deletes a SKU together with its batches, barcodes and tests
    #[instrument(skip(self))]
    pub async fn delete_sku(&self, id: i32) -> Result<(), ServiceError> {
        db::transaction(&self.db_pool, move |txn| {
            Box::pin(async move {
                let existing = sku::Entity::find_by_id(id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("SKU {} not found", id)))?;

                let test_ids: Vec<i32> = quality_test::Entity::find()
                    .select_only()
                    .column(quality_test::Column::Id)
                    .filter(quality_test::Column::SkuId.eq(id))
                    .into_tuple()
                    .all(txn)
                    .await?;

                test_answer::Entity::delete_many()
                    .filter(test_answer::Column::TestId.is_in(test_ids))
                    .exec(txn)
                    .await?;
                quality_test::Entity::delete_many()
                    .filter(quality_test::Column::SkuId.eq(id))
                    .exec(txn)
                    .await?;
                let barcodes = barcode::Entity::delete_many()
                    .filter(barcode::Column::SkuId.eq(id))
                    .exec(txn)
                    .await?;
                batch::Entity::delete_many()
                    .filter(batch::Column::SkuId.eq(id))
                    .exec(txn)
                    .await?;
                sku::Entity::delete_by_id(id).exec(txn).await?;

                info!(
                    sku_id = id,
                    code = %existing.code,
                    barcodes_removed = barcodes.rows_affected,
                    "SKU deleted"
                );
                Ok::<_, ServiceError>(())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use assert_matches::assert_matches;

    async fn service() -> SkuService {
        let db = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..DbConfig::default()
        })
        .await
        .unwrap();
        run_migrations(&db).await.unwrap();
        SkuService::new(Arc::new(db))
    }

    fn request(code: &str) -> CreateSkuRequest {
        CreateSkuRequest {
            code: code.into(),
            description: "Solar charge controller".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_code_is_a_conflict() {
        let skus = service().await;
        skus.create_sku(request("BT100")).await.unwrap();
        let err = skus.create_sku(request(" BT100 ")).await.unwrap_err();
        assert_matches!(err, ServiceError::Conflict(_));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn code_length_is_validated() {
        let skus = service().await;
        assert_matches!(
            skus.create_sku(request("ABCDEFGHIJK")).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            skus.create_sku(request("   ")).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            skus.create_sku(request("BT 1")).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn search_matches_code_and_description() {
        let skus = service().await;
        skus.create_sku(request("BT100")).await.unwrap();
        skus.create_sku(CreateSkuRequest {
            code: "INV20".into(),
            description: "Inverter".into(),
        })
        .await
        .unwrap();

        let by_code = skus
            .list_skus(
                SkuFilter {
                    search: Some("bt".into()),
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_code.total, 1);
        assert_eq!(by_code.items[0].code, "BT100");

        let by_description = skus
            .list_skus(
                SkuFilter {
                    search: Some("INVERT".into()),
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_description.items[0].code, "INV20");
    }

    #[tokio::test]
    async fn missing_sku_is_not_found() {
        let skus = service().await;
        assert_matches!(skus.get_sku(42).await, Err(ServiceError::NotFound(_)));
        assert_matches!(skus.delete_sku(42).await, Err(ServiceError::NotFound(_)));
    }
}
