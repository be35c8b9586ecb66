use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_cart_tables::Migration),
            Box::new(m20240601_000003_create_coupon_tables::Migration),
            Box::new(m20240601_000004_create_orders_tables::Migration),
            Box::new(m20240601_000005_create_guest_orders_tables::Migration),
        ]
    }
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(16, 4)
        .not_null()
        .default(0)
        .to_owned()
}

// Migration implementations

mod m20240601_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
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
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::CategoryId).uuid().not_null())
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
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
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::Sku)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(ProductVariants::Size).string().not_null())
                        .col(ColumnDef::new(ProductVariants::Color).string().not_null())
                        .col(&mut super::money(ProductVariants::Price))
                        .col(
                            ColumnDef::new(ProductVariants::StockQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_variants_product")
                                .from(ProductVariants::Table, ProductVariants::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_category_id")
                        .table(Products::Table)
                        .col(Products::CategoryId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        CategoryId,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductVariants {
        Table,
        Id,
        ProductId,
        Sku,
        Size,
        Color,
        Price,
        StockQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_cart_tables {

    use super::m20240601_000001_create_catalog_tables::ProductVariants;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_cart_tables"
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
                        .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Carts::UserId).uuid().null())
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::VariantId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_cart")
                                .from(CartItems::Table, CartItems::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_variant")
                                .from(CartItems::Table, CartItems::VariantId)
                                .to(ProductVariants::Table, ProductVariants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        UserId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        CartId,
        VariantId,
        Quantity,
        CreatedAt,
    }
}

mod m20240601_000003_create_coupon_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Coupons::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Coupons::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(&mut super::money(Coupons::DiscountValue))
                        .col(&mut super::money(Coupons::MinPurchaseAmount))
                        .col(
                            ColumnDef::new(Coupons::ExpiryDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::MaxUses)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::UsesPerUser)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsPublic)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::Scope)
                                .string_len(16)
                                .not_null()
                                .default("all"),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CouponCategories::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CouponCategories::CouponId).uuid().not_null())
                        .col(
                            ColumnDef::new(CouponCategories::CategoryId)
                                .uuid()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(CouponCategories::CouponId)
                                .col(CouponCategories::CategoryId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_categories_coupon")
                                .from(CouponCategories::Table, CouponCategories::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CouponProducts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CouponProducts::CouponId).uuid().not_null())
                        .col(ColumnDef::new(CouponProducts::ProductId).uuid().not_null())
                        .primary_key(
                            Index::create()
                                .col(CouponProducts::CouponId)
                                .col(CouponProducts::ProductId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_products_coupon")
                                .from(CouponProducts::Table, CouponProducts::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserVouchers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserVouchers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserVouchers::UserId).uuid().not_null())
                        .col(ColumnDef::new(UserVouchers::CouponId).uuid().not_null())
                        .col(
                            ColumnDef::new(UserVouchers::IsUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(UserVouchers::ClaimedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UserVouchers::UsedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_user_vouchers_coupon")
                                .from(UserVouchers::Table, UserVouchers::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_user_vouchers_user_coupon")
                        .table(UserVouchers::Table)
                        .col(UserVouchers::UserId)
                        .col(UserVouchers::CouponId)
                        .to_owned(),
                )
                .await?;

            // Order references are nullable and unconstrained: a row points at
            // either a registered or a guest order.
            manager
                .create_table(
                    Table::create()
                        .table(CouponUsageLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponUsageLogs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CouponUsageLogs::CouponId).uuid().not_null())
                        .col(ColumnDef::new(CouponUsageLogs::OrderId).uuid().null())
                        .col(ColumnDef::new(CouponUsageLogs::GuestOrderId).uuid().null())
                        .col(ColumnDef::new(CouponUsageLogs::UserId).uuid().null())
                        .col(ColumnDef::new(CouponUsageLogs::GuestEmail).string().null())
                        .col(&mut super::money(CouponUsageLogs::DiscountAmount))
                        .col(
                            ColumnDef::new(CouponUsageLogs::UsedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_usage_logs_coupon")
                                .from(CouponUsageLogs::Table, CouponUsageLogs::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupon_usage_logs_coupon_user")
                        .table(CouponUsageLogs::Table)
                        .col(CouponUsageLogs::CouponId)
                        .col(CouponUsageLogs::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponUsageLogs::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(UserVouchers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CouponProducts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CouponCategories::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        MinPurchaseAmount,
        ExpiryDate,
        MaxUses,
        UsedCount,
        UsesPerUser,
        IsPublic,
        Scope,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CouponCategories {
        Table,
        CouponId,
        CategoryId,
    }

    #[derive(DeriveIden)]
    enum CouponProducts {
        Table,
        CouponId,
        ProductId,
    }

    #[derive(DeriveIden)]
    enum UserVouchers {
        Table,
        Id,
        UserId,
        CouponId,
        IsUsed,
        ClaimedAt,
        UsedAt,
    }

    #[derive(DeriveIden)]
    enum CouponUsageLogs {
        Table,
        Id,
        CouponId,
        OrderId,
        GuestOrderId,
        UserId,
        GuestEmail,
        DiscountAmount,
        UsedAt,
    }
}

/// Columns shared by `orders` and `guest_orders`.
fn order_header_columns<T: IntoIden + Copy>(
    table: &mut TableCreateStatement,
    cols: OrderHeaderColumns<T>,
) {
    table
        .col(ColumnDef::new(cols.id).uuid().primary_key().not_null())
        .col(
            ColumnDef::new(cols.order_number)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(&mut money(cols.subtotal))
        .col(&mut money(cols.shipping_fee))
        .col(&mut money(cols.discount_amount))
        .col(&mut money(cols.total_amount))
        .col(ColumnDef::new(cols.coupon_code).string().null())
        .col(ColumnDef::new(cols.payment_method).string_len(16).not_null())
        .col(ColumnDef::new(cols.shipping_provider_id).uuid().not_null())
        .col(ColumnDef::new(cols.shipping_address).text().not_null())
        .col(ColumnDef::new(cols.tracking_code).string().null())
        .col(ColumnDef::new(cols.status).string_len(32).not_null())
        .col(ColumnDef::new(cols.payment_status).string_len(16).not_null())
        .col(ColumnDef::new(cols.gateway_transaction_ref).string().null())
        .col(
            ColumnDef::new(cols.order_date)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(cols.paid_at)
                .timestamp_with_time_zone()
                .null(),
        )
        .col(
            ColumnDef::new(cols.created_at)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(cols.updated_at)
                .timestamp_with_time_zone()
                .not_null(),
        );
}

struct OrderHeaderColumns<T> {
    id: T,
    order_number: T,
    subtotal: T,
    shipping_fee: T,
    discount_amount: T,
    total_amount: T,
    coupon_code: T,
    payment_method: T,
    shipping_provider_id: T,
    shipping_address: T,
    tracking_code: T,
    status: T,
    payment_status: T,
    gateway_transaction_ref: T,
    order_date: T,
    paid_at: T,
    created_at: T,
    updated_at: T,
}

mod m20240601_000004_create_orders_tables {

    use super::m20240601_000001_create_catalog_tables::ProductVariants;
    use super::{order_header_columns, OrderHeaderColumns};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let mut orders = Table::create();
            orders
                .table(Orders::Table)
                .if_not_exists()
                .col(ColumnDef::new(Orders::UserId).uuid().not_null());
            order_header_columns(
                &mut orders,
                OrderHeaderColumns {
                    id: Orders::Id,
                    order_number: Orders::OrderNumber,
                    subtotal: Orders::Subtotal,
                    shipping_fee: Orders::ShippingFee,
                    discount_amount: Orders::DiscountAmount,
                    total_amount: Orders::TotalAmount,
                    coupon_code: Orders::CouponCode,
                    payment_method: Orders::PaymentMethod,
                    shipping_provider_id: Orders::ShippingProviderId,
                    shipping_address: Orders::ShippingAddress,
                    tracking_code: Orders::TrackingCode,
                    status: Orders::Status,
                    payment_status: Orders::PaymentStatus,
                    gateway_transaction_ref: Orders::GatewayTransactionRef,
                    order_date: Orders::OrderDate,
                    paid_at: Orders::PaidAt,
                    created_at: Orders::CreatedAt,
                    updated_at: Orders::UpdatedAt,
                },
            );
            manager.create_table(orders.to_owned()).await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_order_date")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::OrderDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::VariantId).uuid().null())
                        .col(ColumnDef::new(OrderItems::Sku).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(&mut super::money(OrderItems::UnitPrice))
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_variant")
                                .from(OrderItems::Table, OrderItems::VariantId)
                                .to(ProductVariants::Table, ProductVariants::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        Subtotal,
        ShippingFee,
        DiscountAmount,
        TotalAmount,
        CouponCode,
        PaymentMethod,
        ShippingProviderId,
        ShippingAddress,
        TrackingCode,
        Status,
        PaymentStatus,
        GatewayTransactionRef,
        OrderDate,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        VariantId,
        Sku,
        Quantity,
        UnitPrice,
        CreatedAt,
    }
}

mod m20240601_000005_create_guest_orders_tables {

    use super::m20240601_000001_create_catalog_tables::ProductVariants;
    use super::{order_header_columns, OrderHeaderColumns};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_guest_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let mut guest_orders = Table::create();
            guest_orders
                .table(GuestOrders::Table)
                .if_not_exists()
                .col(ColumnDef::new(GuestOrders::GuestName).string().not_null())
                .col(ColumnDef::new(GuestOrders::GuestEmail).string().not_null())
                .col(ColumnDef::new(GuestOrders::GuestPhone).string().not_null());
            order_header_columns(
                &mut guest_orders,
                OrderHeaderColumns {
                    id: GuestOrders::Id,
                    order_number: GuestOrders::OrderNumber,
                    subtotal: GuestOrders::Subtotal,
                    shipping_fee: GuestOrders::ShippingFee,
                    discount_amount: GuestOrders::DiscountAmount,
                    total_amount: GuestOrders::TotalAmount,
                    coupon_code: GuestOrders::CouponCode,
                    payment_method: GuestOrders::PaymentMethod,
                    shipping_provider_id: GuestOrders::ShippingProviderId,
                    shipping_address: GuestOrders::ShippingAddress,
                    tracking_code: GuestOrders::TrackingCode,
                    status: GuestOrders::Status,
                    payment_status: GuestOrders::PaymentStatus,
                    gateway_transaction_ref: GuestOrders::GatewayTransactionRef,
                    order_date: GuestOrders::OrderDate,
                    paid_at: GuestOrders::PaidAt,
                    created_at: GuestOrders::CreatedAt,
                    updated_at: GuestOrders::UpdatedAt,
                },
            );
            manager.create_table(guest_orders.to_owned()).await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_guest_orders_guest_email")
                        .table(GuestOrders::Table)
                        .col(GuestOrders::GuestEmail)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_guest_orders_status_order_date")
                        .table(GuestOrders::Table)
                        .col(GuestOrders::Status)
                        .col(GuestOrders::OrderDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(GuestOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(GuestOrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GuestOrderItems::GuestOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(GuestOrderItems::VariantId).uuid().null())
                        .col(ColumnDef::new(GuestOrderItems::Sku).string().not_null())
                        .col(
                            ColumnDef::new(GuestOrderItems::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(&mut super::money(GuestOrderItems::UnitPrice))
                        .col(
                            ColumnDef::new(GuestOrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_guest_order_items_order")
                                .from(GuestOrderItems::Table, GuestOrderItems::GuestOrderId)
                                .to(GuestOrders::Table, GuestOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_guest_order_items_variant")
                                .from(GuestOrderItems::Table, GuestOrderItems::VariantId)
                                .to(ProductVariants::Table, ProductVariants::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(GuestOrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(GuestOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum GuestOrders {
        Table,
        Id,
        OrderNumber,
        GuestName,
        GuestEmail,
        GuestPhone,
        Subtotal,
        ShippingFee,
        DiscountAmount,
        TotalAmount,
        CouponCode,
        PaymentMethod,
        ShippingProviderId,
        ShippingAddress,
        TrackingCode,
        Status,
        PaymentStatus,
        GatewayTransactionRef,
        OrderDate,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum GuestOrderItems {
        Table,
        Id,
        GuestOrderId,
        VariantId,
        Sku,
        Quantity,
        UnitPrice,
        CreatedAt,
    }
}
