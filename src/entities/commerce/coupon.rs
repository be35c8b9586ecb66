use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount rule redeemable by code.
///
/// `max_uses` and `uses_per_user` use `0` for "unlimited". `used_count` is
/// only ever incremented, inside the transaction that places the order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: DiscountType,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub min_purchase_amount: Decimal,
    pub expiry_date: DateTime<Utc>,
    pub max_uses: i32,
    pub used_count: i32,
    pub uses_per_user: i32,
    pub is_public: bool,
    pub scope: CouponScope,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_category::Entity")]
    Categories,
    #[sea_orm(has_many = "super::coupon_product::Entity")]
    Products,
    #[sea_orm(has_many = "super::user_voucher::Entity")]
    UserVouchers,
    #[sea_orm(has_many = "super::coupon_usage_log::Entity")]
    UsageLogs,
}

impl Related<super::coupon_category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Categories.def()
    }
}

impl Related<super::coupon_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl Related<super::user_voucher::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserVouchers.def()
    }
}

impl Related<super::coupon_usage_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
}

/// Which lines of an order a coupon may discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum CouponScope {
    #[sea_orm(string_value = "all")]
    All,
    #[sea_orm(string_value = "categories")]
    Categories,
    #[sea_orm(string_value = "products")]
    Products,
}
