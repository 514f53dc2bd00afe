//! Create system message table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SystemMessage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SystemMessage::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SystemMessage::Title)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SystemMessage::Content).text().not_null())
                    .col(
                        ColumnDef::new(SystemMessage::MessageType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SystemMessage::Priority)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SystemMessage::Creator).json_binary())
                    .col(
                        ColumnDef::new(SystemMessage::HideCreator)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SystemMessage::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(SystemMessage::Recipients)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SystemMessage::TargetUserId).string_len(32))
                    .col(ColumnDef::new(SystemMessage::Metadata).json_binary())
                    .col(
                        ColumnDef::new(SystemMessage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(SystemMessage::ExpiresAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index: is_active (every read and the cleanup scan filter on it)
        manager
            .create_index(
                Index::create()
                    .name("idx_system_message_is_active")
                    .table(SystemMessage::Table)
                    .col(SystemMessage::IsActive)
                    .to_owned(),
            )
            .await?;

        // Index: created_at (retention age checks, newest-first listings)
        manager
            .create_index(
                Index::create()
                    .name("idx_system_message_created_at")
                    .table(SystemMessage::Table)
                    .col(SystemMessage::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Index: target_user_id (single-recipient lookups)
        manager
            .create_index(
                Index::create()
                    .name("idx_system_message_target_user_id")
                    .table(SystemMessage::Table)
                    .col(SystemMessage::TargetUserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SystemMessage::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SystemMessage {
    Table,
    Id,
    Title,
    Content,
    MessageType,
    Priority,
    Creator,
    HideCreator,
    IsActive,
    Recipients,
    TargetUserId,
    Metadata,
    CreatedAt,
    ExpiresAt,
}
