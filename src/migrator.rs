use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_products_table::Migration),
            Box::new(m20240101_000002_create_orders_table::Migration),
            Box::new(m20240101_000003_create_sub_orders_table::Migration),
            Box::new(m20240101_000004_create_return_requests_table::Migration),
            Box::new(m20240101_000005_create_carts_table::Migration),
            Box::new(m20240101_000006_create_shipment_jobs_table::Migration),
            Box::new(m20240101_000007_create_payment_webhook_events_table::Migration),
        ]
    }
}

mod m20240101_000001_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_products_table"
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
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::SellerId).uuid().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::ImageUrl).string().null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Products::Stock).gte(0)),
                        )
                        .col(ColumnDef::new(Products::LengthCm).decimal().null())
                        .col(ColumnDef::new(Products::BreadthCm).decimal().null())
                        .col(ColumnDef::new(Products::HeightCm).decimal().null())
                        .col(ColumnDef::new(Products::WeightKg).decimal().null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
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
    enum Products {
        Table,
        Id,
        SellerId,
        Name,
        ImageUrl,
        Price,
        Stock,
        LengthCm,
        BreadthCm,
        HeightCm,
        WeightKg,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_orders_table"
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
                        .col(ColumnDef::new(Orders::OrderNumber).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::BuyerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::BuyerContact).json().not_null())
                        .col(ColumnDef::new(Orders::DeliveryAddress).json().not_null())
                        .col(ColumnDef::new(Orders::Billing).json().null())
                        .col(ColumnDef::new(Orders::Coupon).json().null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal().not_null())
                        .col(ColumnDef::new(Orders::Discount).decimal().not_null())
                        .col(ColumnDef::new(Orders::ShippingCost).decimal().not_null())
                        .col(ColumnDef::new(Orders::TaxableAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::GstMode).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::GstRate).decimal().not_null())
                        .col(ColumnDef::new(Orders::Cgst).decimal().not_null())
                        .col(ColumnDef::new(Orders::Sgst).decimal().not_null())
                        .col(ColumnDef::new(Orders::Igst).decimal().not_null())
                        .col(ColumnDef::new(Orders::GstTotal).decimal().not_null())
                        .col(ColumnDef::new(Orders::TotalAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::GatewayOrderId).string().null())
                        .col(ColumnDef::new(Orders::PaymentTransactionId).string().null())
                        .col(ColumnDef::new(Orders::PaymentFailureReason).string().null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::SubOrderIds).json().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
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
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            for (name, column) in [
                ("idx_orders_buyer_id", Orders::BuyerId),
                ("idx_orders_status", Orders::Status),
                ("idx_orders_order_date", Orders::OrderDate),
                ("idx_orders_gateway_order_id", Orders::GatewayOrderId),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(Orders::Table)
                            .col(column)
                            .to_owned(),
                    )
                    .await?;
            }

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        BuyerId,
        BuyerContact,
        DeliveryAddress,
        Billing,
        Coupon,
        Subtotal,
        Discount,
        ShippingCost,
        TaxableAmount,
        GstMode,
        GstRate,
        Cgst,
        Sgst,
        Igst,
        GstTotal,
        TotalAmount,
        PaymentMethod,
        PaymentStatus,
        GatewayOrderId,
        PaymentTransactionId,
        PaymentFailureReason,
        Status,
        SubOrderIds,
        OrderDate,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_sub_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_sub_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SubOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SubOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SubOrders::OrderId).uuid().not_null())
                        .col(ColumnDef::new(SubOrders::SellerId).uuid().not_null())
                        .col(ColumnDef::new(SubOrders::Items).json().not_null())
                        .col(ColumnDef::new(SubOrders::Subtotal).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::Discount).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::ShippingCost).decimal().not_null())
                        .col(
                            ColumnDef::new(SubOrders::TaxableAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SubOrders::GstMode).string_len(16).not_null())
                        .col(ColumnDef::new(SubOrders::GstRate).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::Cgst).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::Sgst).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::Igst).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::GstTotal).decimal().not_null())
                        .col(ColumnDef::new(SubOrders::TotalAmount).decimal().not_null())
                        .col(
                            ColumnDef::new(SubOrders::PaymentType)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(ColumnDef::new(SubOrders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(SubOrders::ShipmentPackage).json().null())
                        .col(
                            ColumnDef::new(SubOrders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(SubOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SubOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sub_orders_order_id")
                                .from(SubOrders::Table, SubOrders::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sub_orders_order_id")
                        .table(SubOrders::Table)
                        .col(SubOrders::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sub_orders_seller_id")
                        .table(SubOrders::Table)
                        .col(SubOrders::SellerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SubOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum SubOrders {
        Table,
        Id,
        OrderId,
        SellerId,
        Items,
        Subtotal,
        Discount,
        ShippingCost,
        TaxableAmount,
        GstMode,
        GstRate,
        Cgst,
        Sgst,
        Igst,
        GstTotal,
        TotalAmount,
        PaymentType,
        Status,
        ShipmentPackage,
        DeliveredAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_return_requests_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_return_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReturnRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnRequests::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnRequests::OrderId).uuid().not_null())
                        .col(ColumnDef::new(ReturnRequests::SubOrderId).uuid().not_null())
                        .col(ColumnDef::new(ReturnRequests::UserId).uuid().not_null())
                        .col(ColumnDef::new(ReturnRequests::SellerId).uuid().not_null())
                        .col(ColumnDef::new(ReturnRequests::Reason).string().not_null())
                        .col(ColumnDef::new(ReturnRequests::Description).text().null())
                        .col(ColumnDef::new(ReturnRequests::Items).json().not_null())
                        .col(
                            ColumnDef::new(ReturnRequests::RefundAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnRequests::ReturnWindowDays)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnRequests::OriginalSubOrderStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnRequests::OriginalOrderStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnRequests::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnRequests::History).json().not_null())
                        .col(
                            ColumnDef::new(ReturnRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnRequests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_requests_sub_order_id")
                                .from(ReturnRequests::Table, ReturnRequests::SubOrderId)
                                .to(SubOrders::Table, SubOrders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_requests_sub_order_status")
                        .table(ReturnRequests::Table)
                        .col(ReturnRequests::SubOrderId)
                        .col(ReturnRequests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_requests_order_id")
                        .table(ReturnRequests::Table)
                        .col(ReturnRequests::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SubOrders {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum ReturnRequests {
        Table,
        Id,
        OrderId,
        SubOrderId,
        UserId,
        SellerId,
        Reason,
        Description,
        Items,
        RefundAmount,
        ReturnWindowDays,
        OriginalSubOrderStatus,
        OriginalOrderStatus,
        Status,
        History,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000005_create_carts_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_carts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Carts::BuyerId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Carts::Items).json().not_null())
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        BuyerId,
        Items,
        UpdatedAt,
    }
}

mod m20240101_000006_create_shipment_jobs_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_shipment_jobs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ShipmentJobs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShipmentJobs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShipmentJobs::SubOrderId).uuid().not_null())
                        .col(ColumnDef::new(ShipmentJobs::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(ShipmentJobs::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentJobs::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ShipmentJobs::AvailableAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShipmentJobs::LastError).text().null())
                        .col(
                            ColumnDef::new(ShipmentJobs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentJobs::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipment_jobs_sub_order_id")
                        .table(ShipmentJobs::Table)
                        .col(ShipmentJobs::SubOrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipment_jobs_status_available_at")
                        .table(ShipmentJobs::Table)
                        .col(ShipmentJobs::Status)
                        .col(ShipmentJobs::AvailableAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShipmentJobs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ShipmentJobs {
        Table,
        Id,
        SubOrderId,
        OrderId,
        Status,
        Attempts,
        AvailableAt,
        LastError,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000007_create_payment_webhook_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_payment_webhook_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentWebhookEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::EventId)
                                .string_len(128)
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::EventType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::GatewayOrderId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::Outcome)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentWebhookEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentWebhookEvents {
        Table,
        EventId,
        EventType,
        GatewayOrderId,
        Outcome,
        ReceivedAt,
    }
}
