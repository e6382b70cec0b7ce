use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One manufacturing run. `prefix` is always the owning SKU's code and is
/// written only by the issuance service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "batches")]
#[schema(as = Batch)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub sku_id: i32,
    pub prefix: String,
    pub batch_date: NaiveDate,
    pub quantity: i32,
    pub device_name: String,
    pub battery: String,
    pub capacity: String,
    pub mppt_cap: Option<String>,
    pub voc_max: Option<String>,
    pub feature_spec: Option<String>,
    pub ef: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sku::Entity",
        from = "Column::SkuId",
        to = "super::sku::Column::Id",
        on_delete = "Cascade"
    )]
    Sku,
    #[sea_orm(has_many = "super::barcode::Entity")]
    Barcodes,
    #[sea_orm(has_many = "super::quality_test::Entity")]
    Tests,
}

impl Related<super::sku::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sku.def()
    }
}

impl Related<super::barcode::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Barcodes.def()
    }
}

impl Related<super::quality_test::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
