use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum LocalKv {
    Table,
    Key,
    Value,
    UpdatedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000003_create_local_kv_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LocalKv::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LocalKv::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LocalKv::Value).text().not_null())
                    .col(ColumnDef::new(LocalKv::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LocalKv::Table).to_owned())
            .await
    }
}
