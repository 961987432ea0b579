use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    ConversationId,
    Seq,
    SenderId,
    SenderName,
    SenderRole,
    Body,
    Timestamp,
    Read,
    ReadAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000002_create_messages_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Messages::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Messages::ConversationId).string().not_null())
                    .col(ColumnDef::new(Messages::Seq).big_integer().not_null())
                    .col(ColumnDef::new(Messages::SenderId).string().not_null())
                    .col(ColumnDef::new(Messages::SenderName).string().not_null())
                    .col(ColumnDef::new(Messages::SenderRole).string().not_null())
                    .col(ColumnDef::new(Messages::Body).string().not_null())
                    .col(ColumnDef::new(Messages::Timestamp).big_integer().not_null())
                    .col(
                        ColumnDef::new(Messages::Read)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Messages::ReadAt).big_integer())
                    .to_owned(),
            )
            .await?;

        // One sequence number per slot: a racing append fails instead of duplicating
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_messages_conversation_seq")
                    .table(Messages::Table)
                    .col(Messages::ConversationId)
                    .col(Messages::Seq)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_messages_conversation_timestamp")
                    .table(Messages::Table)
                    .col(Messages::ConversationId)
                    .col(Messages::Timestamp)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await
    }
}
