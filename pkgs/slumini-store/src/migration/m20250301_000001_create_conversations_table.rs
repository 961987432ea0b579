use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
    StudentId,
    StudentName,
    AlumniId,
    AlumniName,
    LastMessage,
    LastMessageTime,
    LastMessageSender,
    UnreadStudent,
    UnreadAlumni,
    StudentReadSeq,
    AlumniReadSeq,
    CreatedAt,
    UpdatedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_conversations_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Conversations::StudentId).string().not_null())
                    .col(ColumnDef::new(Conversations::StudentName).string().not_null())
                    .col(ColumnDef::new(Conversations::AlumniId).string().not_null())
                    .col(ColumnDef::new(Conversations::AlumniName).string().not_null())
                    .col(ColumnDef::new(Conversations::LastMessage).string().not_null())
                    .col(
                        ColumnDef::new(Conversations::LastMessageTime)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::LastMessageSender)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::UnreadStudent)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Conversations::UnreadAlumni)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Conversations::StudentReadSeq)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Conversations::AlumniReadSeq)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Conversations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversations_student")
                    .table(Conversations::Table)
                    .col(Conversations::StudentId)
                    .col(Conversations::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversations_alumni")
                    .table(Conversations::Table)
                    .col(Conversations::AlumniId)
                    .col(Conversations::UpdatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Conversations::Table).to_owned())
            .await
    }
}
