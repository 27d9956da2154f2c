use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_restaurants_table::Migration),
            Box::new(m20250101_000002_create_menu_items_table::Migration),
            Box::new(m20250101_000003_create_orders_table::Migration),
            Box::new(m20250101_000004_create_payments_table::Migration),
        ]
    }
}

mod m20250101_000001_create_restaurants_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_restaurants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Restaurants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Restaurants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Restaurants::Name).string().not_null())
                        .col(ColumnDef::new(Restaurants::OwnerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Restaurants::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Restaurants::IsApproved)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Restaurants::DeliveryFee)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Restaurants::FreeDeliveryMinAmount)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Restaurants::PackagingFee)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Restaurants::PrepTimeMinutes).integer())
                        .col(
                            ColumnDef::new(Restaurants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Restaurants::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Restaurants {
        Table,
        Id,
        Name,
        OwnerId,
        IsActive,
        IsApproved,
        DeliveryFee,
        FreeDeliveryMinAmount,
        PackagingFee,
        PrepTimeMinutes,
        CreatedAt,
    }
}

mod m20250101_000002_create_menu_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_menu_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MenuItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MenuItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MenuItems::RestaurantId).uuid().not_null())
                        .col(ColumnDef::new(MenuItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(MenuItems::Price)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MenuItems::DiscountedPrice)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(MenuItems::IsAvailable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(MenuItems::Customizations).json().not_null())
                        .col(
                            ColumnDef::new(MenuItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_menu_items_restaurant_id")
                        .table(MenuItems::Table)
                        .col(MenuItems::RestaurantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MenuItems::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum MenuItems {
        Table,
        Id,
        RestaurantId,
        Name,
        Price,
        DiscountedPrice,
        IsAvailable,
        Customizations,
        CreatedAt,
    }
}

mod m20250101_000003_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::RestaurantId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Items).json().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::StatusHistory).json().not_null())
                        .col(ColumnDef::new(Orders::OrderType).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentId).uuid())
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(
                            ColumnDef::new(Orders::Subtotal)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::TaxAmount)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveryFee)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PackagingFee)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Discount)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::CouponCode).string())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::DeliveryAddress).json())
                        .col(ColumnDef::new(Orders::ContactPhone).string().not_null())
                        .col(
                            ColumnDef::new(Orders::EstimatedDeliveryTime)
                                .timestamp_with_time_zone(),
                        )
                        .col(
                            ColumnDef::new(Orders::ActualDeliveryTime)
                                .timestamp_with_time_zone(),
                        )
                        .col(ColumnDef::new(Orders::DeliveryPersonId).uuid())
                        .col(ColumnDef::new(Orders::CancellationReason).string())
                        .col(
                            ColumnDef::new(Orders::CancellationTime)
                                .timestamp_with_time_zone(),
                        )
                        .col(ColumnDef::new(Orders::CancelledBy).uuid())
                        .col(ColumnDef::new(Orders::RefundAmount).decimal_len(10, 2))
                        .col(ColumnDef::new(Orders::RefundTime).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_restaurant_id")
                        .table(Orders::Table)
                        .col(Orders::RestaurantId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Orders {
        Table,
        Id,
        UserId,
        RestaurantId,
        Items,
        Status,
        StatusHistory,
        OrderType,
        PaymentMethod,
        PaymentId,
        PaymentStatus,
        Subtotal,
        TaxAmount,
        DeliveryFee,
        PackagingFee,
        Discount,
        CouponCode,
        TotalAmount,
        DeliveryAddress,
        ContactPhone,
        EstimatedDeliveryTime,
        ActualDeliveryTime,
        DeliveryPersonId,
        CancellationReason,
        CancellationTime,
        CancelledBy,
        RefundAmount,
        RefundTime,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20250101_000004_create_payments_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Payments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::UserId).uuid().not_null())
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(Payments::Amount)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Currency).string().not_null())
                        .col(ColumnDef::new(Payments::PaymentMethod).string().not_null())
                        .col(
                            ColumnDef::new(Payments::PaymentGateway)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Status).string().not_null())
                        .col(ColumnDef::new(Payments::GatewayOrderId).string())
                        .col(ColumnDef::new(Payments::GatewayPaymentId).string())
                        .col(ColumnDef::new(Payments::GatewaySignature).string())
                        .col(ColumnDef::new(Payments::RefundStatus).string().not_null())
                        .col(ColumnDef::new(Payments::RefundAmount).decimal_len(10, 2))
                        .col(ColumnDef::new(Payments::RefundReason).string())
                        .col(ColumnDef::new(Payments::RefundId).string())
                        .col(ColumnDef::new(Payments::ErrorMessage).string())
                        .col(ColumnDef::new(Payments::ErrorCode).string())
                        .col(ColumnDef::new(Payments::Notes).string())
                        .col(ColumnDef::new(Payments::Metadata).json())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_user_id")
                        .table(Payments::Table)
                        .col(Payments::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_gateway_order_id")
                        .table(Payments::Table)
                        .col(Payments::GatewayOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Payments {
        Table,
        Id,
        UserId,
        OrderId,
        Amount,
        Currency,
        PaymentMethod,
        PaymentGateway,
        Status,
        GatewayOrderId,
        GatewayPaymentId,
        GatewaySignature,
        RefundStatus,
        RefundAmount,
        RefundReason,
        RefundId,
        ErrorMessage,
        ErrorCode,
        Notes,
        Metadata,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}
