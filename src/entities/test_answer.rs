use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Immutable once written; created together with its test.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "test_answers")]
#[schema(as = TestAnswer)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub test_id: i32,
    pub question_id: i32,
    pub is_passed: bool,
    #[sea_orm(column_type = "Text")]
    pub remarks: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::quality_test::Entity",
        from = "Column::TestId",
        to = "super::quality_test::Column::Id",
        on_delete = "Cascade"
    )]
    Test,
    #[sea_orm(
        belongs_to = "super::test_question::Entity",
        from = "Column::QuestionId",
        to = "super::test_question::Column::Id",
        on_delete = "Cascade"
    )]
    Question,
}

impl Related<super::quality_test::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Test.def()
    }
}

impl Related<super::test_question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Question.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
