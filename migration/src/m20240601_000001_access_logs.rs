//! 访问日志表迁移
//!
//! 创建 access_logs 表，每个经过代理的请求写入一行：
//! - 请求信息 (host, path, raw_query)
//! - 客户端 IP 与上游耗时
//! - 地理位置信息 (continent, country, region, city, latitude, longitude)

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AccessLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AccessLogs::Host).string_len(255).not_null())
                    .col(ColumnDef::new(AccessLogs::Path).text().not_null())
                    .col(ColumnDef::new(AccessLogs::RawQuery).text().not_null())
                    .col(
                        ColumnDef::new(AccessLogs::ClientIp)
                            .string_len(45)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::DurationMicros)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::Continent)
                            .string_len(16)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::Country)
                            .string_len(64)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::Region)
                            .string_len(128)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::City)
                            .string_len(128)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::Latitude)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::Longitude)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 时间范围查询
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_access_logs_created_at")
                    .table(AccessLogs::Table)
                    .col(AccessLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_access_logs_created_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AccessLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AccessLogs {
    #[sea_orm(iden = "access_logs")]
    Table,
    Id,
    Host,
    Path,
    RawQuery,
    ClientIp,
    DurationMicros,
    Continent,
    Country,
    Region,
    City,
    Latitude,
    Longitude,
    CreatedAt,
}
