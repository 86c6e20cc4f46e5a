//! Create poll table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Poll::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Poll::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Poll::Question).string_len(512).not_null())
                    .col(ColumnDef::new(Poll::Category).string_len(128).not_null())
                    .col(ColumnDef::new(Poll::Cycle).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Poll::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Poll::EndsAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Poll::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: category (category gating and listing)
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_category")
                    .table(Poll::Table)
                    .col(Poll::Category)
                    .to_owned(),
            )
            .await?;

        // Index: cycle (listing a voting period)
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_cycle")
                    .table(Poll::Table)
                    .col(Poll::Cycle)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Poll::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
    Question,
    Category,
    Cycle,
    IsActive,
    EndsAt,
    CreatedAt,
}
