use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_users_table::Migration),
            Box::new(m20240301_000002_create_skus_and_batches::Migration),
            Box::new(m20240301_000003_create_barcodes_table::Migration),
            Box::new(m20240301_000004_create_test_templates::Migration),
            Box::new(m20240301_000005_create_tests_tables::Migration),
        ]
    }
}

// Shared identifiers so later migrations can point foreign keys at earlier tables
#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Username,
    Email,
    PasswordHash,
    Role,
    IsActive,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Skus {
    Table,
    Id,
    Code,
    Description,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Batches {
    Table,
    Id,
    SkuId,
    Prefix,
    BatchDate,
    Quantity,
    DeviceName,
    Battery,
    Capacity,
    MpptCap,
    VocMax,
    FeatureSpec,
    Ef,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Barcodes {
    Table,
    Id,
    BatchId,
    SkuId,
    SequenceNumber,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TestTemplates {
    Table,
    Id,
    Name,
    Description,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TestQuestions {
    Table,
    Id,
    TemplateId,
    QuestionText,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Tests {
    Table,
    Id,
    SkuId,
    BatchId,
    BarcodeId,
    UserId,
    TemplateId,
    OverallStatus,
    TestDate,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TestAnswers {
    Table,
    Id,
    TestId,
    QuestionId,
    IsPassed,
    Remarks,
}

mod m20240301_000001_create_users_table {
    use super::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Users::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Users::Username)
                                .string_len(150)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::Email).string_len(254).not_null())
                        .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                        .col(
                            ColumnDef::new(Users::Role)
                                .string_len(10)
                                .not_null()
                                .default("tester"),
                        )
                        .col(
                            ColumnDef::new(Users::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000002_create_skus_and_batches {
    use super::{Batches, Skus};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_skus_and_batches"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Skus::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Skus::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Skus::Code)
                                .string_len(10)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Skus::Description).text().not_null())
                        .col(
                            ColumnDef::new(Skus::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Batches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Batches::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Batches::SkuId).integer().not_null())
                        .col(ColumnDef::new(Batches::Prefix).string_len(10).not_null())
                        .col(ColumnDef::new(Batches::BatchDate).date().not_null())
                        .col(ColumnDef::new(Batches::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(Batches::DeviceName)
                                .string_len(100)
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Batches::Battery)
                                .string_len(50)
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Batches::Capacity)
                                .string_len(50)
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(Batches::MpptCap).string_len(50).null())
                        .col(ColumnDef::new(Batches::VocMax).string_len(50).null())
                        .col(ColumnDef::new(Batches::FeatureSpec).text().null())
                        .col(ColumnDef::new(Batches::Ef).string_len(50).null())
                        .col(
                            ColumnDef::new(Batches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batches_sku_id")
                                .from(Batches::Table, Batches::SkuId)
                                .to(Skus::Table, Skus::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batches_batch_date")
                        .table(Batches::Table)
                        .col(Batches::BatchDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Batches::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Skus::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000003_create_barcodes_table {
    use super::{Barcodes, Batches, Skus};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_barcodes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Barcodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Barcodes::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Barcodes::BatchId).integer().not_null())
                        .col(ColumnDef::new(Barcodes::SkuId).integer().not_null())
                        // The last line of defence against duplicate sequence numbers
                        .col(
                            ColumnDef::new(Barcodes::SequenceNumber)
                                .string_len(30)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Barcodes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_barcodes_batch_id")
                                .from(Barcodes::Table, Barcodes::BatchId)
                                .to(Batches::Table, Batches::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_barcodes_sku_id")
                                .from(Barcodes::Table, Barcodes::SkuId)
                                .to(Skus::Table, Skus::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_barcodes_batch_id")
                        .table(Barcodes::Table)
                        .col(Barcodes::BatchId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Barcodes::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000004_create_test_templates {
    use super::{TestQuestions, TestTemplates};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_test_templates"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TestTemplates::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TestTemplates::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(TestTemplates::Name)
                                .string_len(100)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(TestTemplates::Description).text().null())
                        .col(
                            ColumnDef::new(TestTemplates::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TestQuestions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TestQuestions::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(TestQuestions::TemplateId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestQuestions::QuestionText)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestQuestions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_test_questions_template_id")
                                .from(TestQuestions::Table, TestQuestions::TemplateId)
                                .to(TestTemplates::Table, TestTemplates::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TestQuestions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TestTemplates::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000005_create_tests_tables {
    use super::{Barcodes, Batches, Skus, TestAnswers, TestQuestions, TestTemplates, Tests, Users};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_tests_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Tests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Tests::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Tests::SkuId).integer().not_null())
                        .col(ColumnDef::new(Tests::BatchId).integer().not_null())
                        .col(ColumnDef::new(Tests::BarcodeId).integer().not_null())
                        .col(ColumnDef::new(Tests::UserId).integer().not_null())
                        .col(ColumnDef::new(Tests::TemplateId).integer().null())
                        .col(
                            ColumnDef::new(Tests::OverallStatus)
                                .string_len(10)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(Tests::TestDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Tests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tests_sku_id")
                                .from(Tests::Table, Tests::SkuId)
                                .to(Skus::Table, Skus::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tests_batch_id")
                                .from(Tests::Table, Tests::BatchId)
                                .to(Batches::Table, Batches::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tests_barcode_id")
                                .from(Tests::Table, Tests::BarcodeId)
                                .to(Barcodes::Table, Barcodes::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tests_user_id")
                                .from(Tests::Table, Tests::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tests_template_id")
                                .from(Tests::Table, Tests::TemplateId)
                                .to(TestTemplates::Table, TestTemplates::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_tests_test_date")
                        .table(Tests::Table)
                        .col(Tests::TestDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TestAnswers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TestAnswers::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(TestAnswers::TestId).integer().not_null())
                        .col(ColumnDef::new(TestAnswers::QuestionId).integer().not_null())
                        .col(
                            ColumnDef::new(TestAnswers::IsPassed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(TestAnswers::Remarks)
                                .text()
                                .not_null()
                                .default(""),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_test_answers_test_id")
                                .from(TestAnswers::Table, TestAnswers::TestId)
                                .to(Tests::Table, Tests::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_test_answers_question_id")
                                .from(TestAnswers::Table, TestAnswers::QuestionId)
                                .to(TestQuestions::Table, TestQuestions::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TestAnswers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Tests::Table).to_owned())
                .await
        }
    }
}
