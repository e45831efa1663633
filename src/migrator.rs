use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_products_table::Migration),
            Box::new(m20250301_000002_create_stock_reservations_table::Migration),
            Box::new(m20250301_000003_create_sellers_table::Migration),
        ]
    }
}

mod m20250301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .string_len(64)
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Title).string_len(255).not_null())
                        .col(ColumnDef::new(Products::SellerId).string_len(64).not_null())
                        .col(ColumnDef::new(Products::Stock).integer().null())
                        .col(ColumnDef::new(Products::MaxStock).integer().null())
                        .col(ColumnDef::new(Products::SellerLatitude).double().null())
                        .col(ColumnDef::new(Products::SellerLongitude).double().null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_products_seller_id")
                        .table(Products::Table)
                        .col(Products::SellerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        Title,
        SellerId,
        Stock,
        MaxStock,
        SellerLatitude,
        SellerLongitude,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_stock_reservations_table {

    use super::m20250301_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_stock_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockReservations::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ProductId)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::PaymentSessionId)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::Status)
                                .string_len(16)
                                .not_null()
                                .default("PENDING"),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(StockReservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_reservations_product")
                                .from(StockReservations::Table, StockReservations::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Serves the availability predicate: product + status + expiry
            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_reservations_availability")
                        .table(StockReservations::Table)
                        .col(StockReservations::ProductId)
                        .col(StockReservations::Status)
                        .col(StockReservations::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_reservations_session")
                        .table(StockReservations::Table)
                        .col(StockReservations::PaymentSessionId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockReservations {
        Table,
        Id,
        ProductId,
        PaymentSessionId,
        Quantity,
        Status,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_create_sellers_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_sellers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sellers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sellers::Id)
                                .string_len(64)
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Sellers::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Sellers::PayoutAccountId)
                                .string_len(255)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Sellers::PayoutsEnabled)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Sellers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Sellers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sellers {
        Table,
        Id,
        Name,
        PayoutAccountId,
        PayoutsEnabled,
        CreatedAt,
    }
}
