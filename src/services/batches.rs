//! Batch issuance: a batch and its full run of barcodes are written in one
//! transaction, with barcode suffixes resumed from whatever the prefix last
//! issued.
//!
//! Issuance for one prefix is serialised in-process by [`PrefixLocks`]. The
//! unique index on `barcodes.sequence_number` stays the final arbiter: a
//! collision rolls the whole attempt back and surfaces as a retryable
//! [`ServiceError::SequenceConflict`] once the configured attempts run out.

use crate::{
    config::IssuanceConfig,
    db::{self, DbPool},
    entities::{barcode, batch, quality_test, sku, test_answer},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::retry::{with_retry, RetryConfig, SequenceConflictPolicy},
    sequence::{allocate, sequence_number, LatestSuffix, Suffix, MIN_STORED_SUFFIX_LEN},
};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{
    sea_query::{Alias, Expr, Func, Order, SimpleExpr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{contains_ignore_case, non_blank, Page, PageRequest};

/// Rows per INSERT statement; keeps large batches under SQLite's bound
/// parameter limit.
const BARCODE_INSERT_CHUNK: usize = 500;

/// Rows read from the top of the (length, text) ordering when resuming, so a
/// few malformed entries there do not hide the real latest suffix.
const TYPED_MAX_WINDOW: u64 = 8;

/// Free-form product description attached to a batch. Opaque to issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct BatchSpec {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub device_name: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub battery: String,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub capacity: String,
    #[validate(length(max = 50))]
    pub mppt_cap: Option<String>,
    #[validate(length(max = 50))]
    pub voc_max: Option<String>,
    #[validate(length(max = 50))]
    pub feature_spec: Option<String>,
    #[validate(length(max = 50))]
    pub ef: Option<String>,
}

/// Everything a caller may choose about a new batch. The prefix is not part
/// of it: it is always the SKU's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueBatchRequest {
    pub sku_id: i32,
    pub batch_date: NaiveDate,
    pub quantity: i32,
    pub spec: BatchSpec,
}

/// A freshly issued batch with its barcodes in issue order
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuedBatch {
    pub batch: batch::Model,
    pub barcodes: Vec<barcode::Model>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct BatchFilter {
    /// Case-insensitive substring of the SKU code
    pub sku_code: Option<String>,
    pub sku_id: Option<i32>,
    /// Earliest batch date, inclusive
    pub from_date: Option<NaiveDate>,
    /// Latest batch date, inclusive
    pub to_date: Option<NaiveDate>,
}

/// Batch row as listed, with its SKU code
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: batch::Model,
    pub sku_code: String,
}

/// Per-prefix issuance locks
#[derive(Debug, Default)]
pub struct PrefixLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PrefixLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive use of `prefix`
    pub async fn acquire(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, ServiceError> {
        let lock = self
            .locks
            .entry(prefix.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                counter!("batchtrace.issuance.lock_timeouts", 1);
                ServiceError::SequenceConflict(format!(
                    "timed out waiting for issuance lock on prefix '{}'",
                    prefix
                ))
            })
    }
}

/// Service for issuing and managing batches
#[derive(Clone)]
pub struct BatchService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    locks: Arc<PrefixLocks>,
    config: IssuanceConfig,
}

impl BatchService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: IssuanceConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            locks: Arc::new(PrefixLocks::new()),
            config,
        }
    }

    /// Creates a batch and exactly `quantity` barcodes for it, atomically.
    #[instrument(skip(self), fields(sku_id = request.sku_id, quantity = request.quantity))]
    pub async fn issue_batch(&self, request: IssueBatchRequest) -> Result<IssuedBatch, ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be a positive integer".to_string(),
            ));
        }
        if request.quantity > self.config.max_quantity {
            return Err(ServiceError::ValidationError(format!(
                "quantity must not exceed {}",
                self.config.max_quantity
            )));
        }
        request.spec.validate()?;

        let sku = sku::Entity::find_by_id(request.sku_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SKU {} not found", request.sku_id)))?;

        let _guard = self
            .locks
            .acquire(
                &sku.code,
                Duration::from_millis(self.config.lock_timeout_ms),
            )
            .await?;

        let retry = RetryConfig::new(
            self.config.max_attempts,
            Duration::from_millis(self.config.retry_backoff_ms),
        );
        let issued = crate::tracing::timed("issue_batch", || {
            with_retry(&retry, SequenceConflictPolicy, |attempt| {
                let sku = sku.clone();
                let request = request.clone();
                async move {
                    let result = issue_once(&self.db_pool, sku, request).await;
                    if let Err(ServiceError::SequenceConflict(reason)) = &result {
                        counter!("batchtrace.issuance.conflicts", 1);
                        warn!(attempt, %reason, "issuance attempt lost a sequence race");
                    }
                    result
                }
            })
        })
        .await?;

        let (first, last) = match (issued.barcodes.first(), issued.barcodes.last()) {
            (Some(first), Some(last)) => (first.sequence_number.clone(), last.sequence_number.clone()),
            _ => (String::new(), String::new()),
        };
        counter!("batchtrace.barcodes.issued", issued.barcodes.len() as u64);
        info!(
            batch_id = issued.batch.id,
            prefix = %issued.batch.prefix,
            first = %first,
            last = %last,
            "batch issued"
        );

        self.event_sender
            .send_or_log(Event::BatchIssued {
                batch_id: issued.batch.id,
                sku_id: issued.batch.sku_id,
                prefix: issued.batch.prefix.clone(),
                quantity: issued.batch.quantity,
                first_sequence: first,
                last_sequence: last,
                issued_at: issued.batch.created_at,
            })
            .await;

        Ok(issued)
    }

    #[instrument(skip(self))]
    pub async fn get_batch(&self, id: i32) -> Result<BatchSummary, ServiceError> {
        let (batch, sku) = batch::Entity::find_by_id(id)
            .find_also_related(sku::Entity)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", id)))?;

        Ok(BatchSummary {
            batch,
            sku_code: sku.map(|s| s.code).unwrap_or_default(),
        })
    }

    /// Lists batches, newest production date first
    #[instrument(skip(self))]
    pub async fn list_batches(
        &self,
        filter: BatchFilter,
        page: PageRequest,
    ) -> Result<Page<BatchSummary>, ServiceError> {
        let mut query = batch::Entity::find().find_also_related(sku::Entity);

        if let Some(code) = non_blank(&filter.sku_code) {
            query = query.filter(contains_ignore_case((sku::Entity, sku::Column::Code), code));
        }
        if let Some(sku_id) = filter.sku_id {
            query = query.filter(batch::Column::SkuId.eq(sku_id));
        }
        if let Some(from) = filter.from_date {
            query = query.filter(batch::Column::BatchDate.gte(from));
        }
        if let Some(to) = filter.to_date {
            query = query.filter(batch::Column::BatchDate.lte(to));
        }

        let paginator = query
            .order_by_desc(batch::Column::BatchDate)
            .order_by_desc(batch::Column::Id)
            .paginate(&*self.db_pool, page.per_page);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.index()).await?;

        let items = rows
            .into_iter()
            .map(|(batch, sku)| BatchSummary {
                batch,
                sku_code: sku.map(|s| s.code).unwrap_or_default(),
            })
            .collect();
        Ok(Page::new(items, total, page))
    }

    /// Barcodes of one batch in issue order, optionally narrowed by a
    /// case-insensitive substring of the sequence number
    #[instrument(skip(self))]
    pub async fn list_barcodes(
        &self,
        batch_id: i32,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<barcode::Model>, ServiceError> {
        self.ensure_batch(batch_id).await?;

        let mut query = barcode::Entity::find().filter(barcode::Column::BatchId.eq(batch_id));
        if let Some(needle) = non_blank(&search) {
            query = query.filter(contains_ignore_case(barcode::Column::SequenceNumber, needle));
        }

        let paginator = query
            .order_by_asc(barcode::Column::Id)
            .paginate(&*self.db_pool, page.per_page);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.index()).await?;

        Ok(Page::new(items, total, page))
    }

    /// Every barcode of a batch in issue order
    #[instrument(skip(self))]
    pub async fn all_barcodes(&self, batch_id: i32) -> Result<Vec<barcode::Model>, ServiceError> {
        Ok(barcode::Entity::find()
            .filter(barcode::Column::BatchId.eq(batch_id))
            .order_by_asc(barcode::Column::Id)
            .all(&*self.db_pool)
            .await?)
    }

    /// A barcode, provided it belongs to `batch_id`
    #[instrument(skip(self))]
    pub async fn get_barcode(
        &self,
        batch_id: i32,
        barcode_id: i32,
    ) -> Result<barcode::Model, ServiceError> {
        barcode::Entity::find_by_id(barcode_id)
            .filter(barcode::Column::BatchId.eq(batch_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Barcode {} not found in batch {}",
                    barcode_id, batch_id
                ))
            })
    }

    #[instrument(skip(self))]
    pub async fn find_barcode_by_sequence(
        &self,
        sequence: &str,
    ) -> Result<barcode::Model, ServiceError> {
        barcode::Entity::find()
            .filter(barcode::Column::SequenceNumber.eq(sequence))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Barcode '{}' not found", sequence)))
    }

    /// Removes a batch with its barcodes, their tests and the tests' answers
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, id: i32) -> Result<u64, ServiceError> {
        let removed = db::transaction(&self.db_pool, move |txn| {
            Box::pin(async move {
                batch::Entity::find_by_id(id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", id)))?;

                let test_ids: Vec<i32> = quality_test::Entity::find()
                    .select_only()
                    .column(quality_test::Column::Id)
                    .filter(quality_test::Column::BatchId.eq(id))
                    .into_tuple()
                    .all(txn)
                    .await?;
                test_answer::Entity::delete_many()
                    .filter(test_answer::Column::TestId.is_in(test_ids))
                    .exec(txn)
                    .await?;
                quality_test::Entity::delete_many()
                    .filter(quality_test::Column::BatchId.eq(id))
                    .exec(txn)
                    .await?;
                let barcodes = barcode::Entity::delete_many()
                    .filter(barcode::Column::BatchId.eq(id))
                    .exec(txn)
                    .await?;
                batch::Entity::delete_by_id(id).exec(txn).await?;

                Ok::<_, ServiceError>(barcodes.rows_affected)
            })
        })
        .await?;

        info!(batch_id = id, barcodes_removed = removed, "batch deleted");
        self.event_sender
            .send_or_log(Event::BatchDeleted {
                batch_id: id,
                barcodes_removed: removed,
            })
            .await;
        Ok(removed)
    }

    async fn ensure_batch(&self, id: i32) -> Result<(), ServiceError> {
        let exists = batch::Entity::find_by_id(id)
            .count(&*self.db_pool)
            .await?
            > 0;
        if exists {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("Batch {} not found", id)))
        }
    }
}

/// One issuance attempt: batch row, resume point, barcode rows, all in a
/// single transaction.
async fn issue_once(
    db: &DbPool,
    sku: sku::Model,
    request: IssueBatchRequest,
) -> Result<IssuedBatch, ServiceError> {
    db::transaction(db, move |txn| {
        Box::pin(async move {
            let now = Utc::now();
            let prefix = sku.code.clone();
            let spec = request.spec;

            let batch = batch::ActiveModel {
                sku_id: Set(sku.id),
                prefix: Set(prefix.clone()),
                batch_date: Set(request.batch_date),
                quantity: Set(request.quantity),
                device_name: Set(spec.device_name),
                battery: Set(spec.battery),
                capacity: Set(spec.capacity),
                mppt_cap: Set(spec.mppt_cap),
                voc_max: Set(spec.voc_max),
                feature_spec: Set(spec.feature_spec),
                ef: Set(spec.ef),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(txn)
            .await?;

            let start = resume_point(txn, &prefix).await?;
            let suffixes = allocate(start, request.quantity as usize);

            let rows: Vec<barcode::ActiveModel> = suffixes
                .iter()
                .map(|suffix| barcode::ActiveModel {
                    batch_id: Set(batch.id),
                    sku_id: Set(sku.id),
                    sequence_number: Set(sequence_number(&prefix, suffix)),
                    created_at: Set(now),
                    ..Default::default()
                })
                .collect();

            for chunk in rows.chunks(BARCODE_INSERT_CHUNK) {
                barcode::Entity::insert_many(chunk.to_vec())
                    .exec(txn)
                    .await
                    .map_err(|e| {
                        ServiceError::on_unique_violation(e, || {
                            ServiceError::SequenceConflict(format!(
                                "barcode range for prefix '{}' was claimed concurrently",
                                prefix
                            ))
                        })
                    })?;
            }

            let barcodes = barcode::Entity::find()
                .filter(barcode::Column::BatchId.eq(batch.id))
                .order_by_asc(barcode::Column::Id)
                .all(txn)
                .await?;

            Ok::<_, ServiceError>(IssuedBatch { batch, barcodes })
        })
    })
    .await
}

/// First suffix to hand out for `prefix`.
///
/// Reads at most two small slices of the prefix's history: the greatest
/// sequence number as text, for the corruption guard, and the top of the
/// (length, text) ordering, which matches issue order for well-formed
/// suffixes.
async fn resume_point<C: ConnectionTrait>(conn: &C, prefix: &str) -> Result<Suffix, ServiceError> {
    let lexical_max: Option<String> = barcode::Entity::find()
        .select_only()
        .column(barcode::Column::SequenceNumber)
        .filter(barcode::Column::SequenceNumber.starts_with(prefix))
        .order_by_desc(barcode::Column::SequenceNumber)
        .limit(1)
        .into_tuple()
        .one(conn)
        .await?;

    let mut candidates: Vec<String> = lexical_max.into_iter().collect();
    if !candidates.is_empty() {
        let length: SimpleExpr = Func::cust(Alias::new("LENGTH"))
            .arg(Expr::col(barcode::Column::SequenceNumber))
            .into();
        let min_length = (prefix.chars().count() + MIN_STORED_SUFFIX_LEN) as i64;

        let typed: Vec<String> = barcode::Entity::find()
            .select_only()
            .column(barcode::Column::SequenceNumber)
            .filter(barcode::Column::SequenceNumber.starts_with(prefix))
            .filter(Expr::expr(length.clone()).gte(min_length))
            .order_by(length, Order::Desc)
            .order_by_desc(barcode::Column::SequenceNumber)
            .limit(TYPED_MAX_WINDOW)
            .into_tuple()
            .all(conn)
            .await?;
        candidates.extend(typed);
    }

    let latest = LatestSuffix::resolve(prefix, &candidates);
    if let LatestSuffix::Malformed(raw) = &latest {
        counter!("batchtrace.issuance.corrupt_suffix", 1);
        warn!(
            prefix,
            stored = %raw,
            "latest stored suffix is malformed; restarting at the first suffix"
        );
    }
    Ok(latest.next_start())
}
