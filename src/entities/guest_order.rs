use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order_state::{OrderStatus, PaymentMethod, PaymentStatus};

/// Order placed without an account. Ids live in their own namespace
/// (`GUEST_<id>` merchant references), disjoint from `orders`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "guest_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub shipping_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_provider_id: Uuid,
    pub shipping_address: String,
    #[sea_orm(nullable)]
    pub tracking_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[sea_orm(nullable)]
    pub gateway_transaction_ref: Option<String>,
    pub order_date: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::guest_order_item::Entity")]
    GuestOrderItem,
}

impl Related<super::guest_order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GuestOrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if !insert || matches!(active_model.updated_at, ActiveValue::NotSet) {
            active_model.updated_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
