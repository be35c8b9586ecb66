use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::entities::{
    guest_order, guest_order_item, order, order_item, OrderStatus, PaymentMethod, PaymentStatus,
};

/// Which table an order lives in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderOwner {
    User,
    Guest,
}

impl OrderOwner {
    fn reference_prefix(self) -> &'static str {
        match self {
            OrderOwner::User => "USER",
            OrderOwner::Guest => "GUEST",
        }
    }
}

/// Address of a registered or guest order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef {
    pub owner: OrderOwner,
    pub id: Uuid,
}

impl OrderRef {
    pub fn user(id: Uuid) -> Self {
        Self {
            owner: OrderOwner::User,
            id,
        }
    }

    pub fn guest(id: Uuid) -> Self {
        Self {
            owner: OrderOwner::Guest,
            id,
        }
    }

    /// Merchant reference sent to the gateway as `vnp_TxnRef`.
    pub fn merchant_reference(&self) -> String {
        format!("{}_{}", self.owner.reference_prefix(), self.id)
    }

    /// Parses `USER_<uuid>` / `GUEST_<uuid>`. Anything else is `None`.
    pub fn parse_merchant_reference(reference: &str) -> Option<Self> {
        let (prefix, id) = reference.split_once('_')?;
        let id = Uuid::parse_str(id).ok()?;
        match prefix {
            "USER" => Some(Self::user(id)),
            "GUEST" => Some(Self::guest(id)),
            _ => None,
        }
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.merchant_reference())
    }
}

/// The columns reconciliation and status changes care about, for either table.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub order: OrderRef,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub tracking_code: Option<String>,
    pub order_date: DateTime<Utc>,
}

impl From<order::Model> for OrderSnapshot {
    fn from(m: order::Model) -> Self {
        Self {
            order: OrderRef::user(m.id),
            order_number: m.order_number,
            user_id: Some(m.user_id),
            guest_email: None,
            total_amount: m.total_amount,
            coupon_code: m.coupon_code,
            payment_method: m.payment_method,
            status: m.status,
            payment_status: m.payment_status,
            tracking_code: m.tracking_code,
            order_date: m.order_date,
        }
    }
}

impl From<guest_order::Model> for OrderSnapshot {
    fn from(m: guest_order::Model) -> Self {
        Self {
            order: OrderRef::guest(m.id),
            order_number: m.order_number,
            user_id: None,
            guest_email: Some(m.guest_email),
            total_amount: m.total_amount,
            coupon_code: m.coupon_code,
            payment_method: m.payment_method,
            status: m.status,
            payment_status: m.payment_status,
            tracking_code: m.tracking_code,
            order_date: m.order_date,
        }
    }
}

/// A line as recorded on the order. `variant_id` is `None` once the variant was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub quantity: i32,
}

/// Columns to overwrite; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_transaction_ref: Option<String>,
    pub tracking_code: Option<String>,
}

/// Reads and writes both order tables. Every method takes the connection or
/// transaction to run on, so callers decide the transaction boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderRepository;

impl OrderRepository {
    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        order_ref: &OrderRef,
    ) -> Result<Option<OrderSnapshot>, DbErr> {
        Self::load(conn, order_ref, false).await
    }

    /// Loads the order row under an exclusive row lock (`FOR UPDATE`).
    pub async fn find_for_update<C: ConnectionTrait>(
        conn: &C,
        order_ref: &OrderRef,
    ) -> Result<Option<OrderSnapshot>, DbErr> {
        Self::load(conn, order_ref, true).await
    }

    async fn load<C: ConnectionTrait>(
        conn: &C,
        order_ref: &OrderRef,
        lock: bool,
    ) -> Result<Option<OrderSnapshot>, DbErr> {
        match order_ref.owner {
            OrderOwner::User => {
                let mut query = order::Entity::find_by_id(order_ref.id);
                if lock {
                    query = query.lock_exclusive();
                }
                Ok(query.one(conn).await?.map(OrderSnapshot::from))
            }
            OrderOwner::Guest => {
                let mut query = guest_order::Entity::find_by_id(order_ref.id);
                if lock {
                    query = query.lock_exclusive();
                }
                Ok(query.one(conn).await?.map(OrderSnapshot::from))
            }
        }
    }

    pub async fn apply_patch<C: ConnectionTrait>(
        conn: &C,
        order_ref: &OrderRef,
        patch: OrderPatch,
    ) -> Result<OrderSnapshot, DbErr> {
        let not_found = || DbErr::RecordNotFound(order_ref.merchant_reference());

        match order_ref.owner {
            OrderOwner::User => {
                let model = order::Entity::find_by_id(order_ref.id)
                    .one(conn)
                    .await?
                    .ok_or_else(not_found)?;
                let mut active: order::ActiveModel = model.into();
                if let Some(status) = patch.status {
                    active.status = Set(status);
                }
                if let Some(payment_status) = patch.payment_status {
                    active.payment_status = Set(payment_status);
                }
                if let Some(paid_at) = patch.paid_at {
                    active.paid_at = Set(Some(paid_at));
                }
                if let Some(txn_ref) = patch.gateway_transaction_ref {
                    active.gateway_transaction_ref = Set(Some(txn_ref));
                }
                if let Some(tracking_code) = patch.tracking_code {
                    active.tracking_code = Set(Some(tracking_code));
                }
                Ok(active.update(conn).await?.into())
            }
            OrderOwner::Guest => {
                let model = guest_order::Entity::find_by_id(order_ref.id)
                    .one(conn)
                    .await?
                    .ok_or_else(not_found)?;
                let mut active: guest_order::ActiveModel = model.into();
                if let Some(status) = patch.status {
                    active.status = Set(status);
                }
                if let Some(payment_status) = patch.payment_status {
                    active.payment_status = Set(payment_status);
                }
                if let Some(paid_at) = patch.paid_at {
                    active.paid_at = Set(Some(paid_at));
                }
                if let Some(txn_ref) = patch.gateway_transaction_ref {
                    active.gateway_transaction_ref = Set(Some(txn_ref));
                }
                if let Some(tracking_code) = patch.tracking_code {
                    active.tracking_code = Set(Some(tracking_code));
                }
                Ok(active.update(conn).await?.into())
            }
        }
    }

    pub async fn lines<C: ConnectionTrait>(
        conn: &C,
        order_ref: &OrderRef,
    ) -> Result<Vec<OrderLine>, DbErr> {
        let lines = match order_ref.owner {
            OrderOwner::User => order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(order_ref.id))
                .order_by_asc(order_item::Column::CreatedAt)
                .all(conn)
                .await?
                .into_iter()
                .map(|item| OrderLine {
                    variant_id: item.variant_id,
                    sku: item.sku,
                    quantity: item.quantity,
                })
                .collect(),
            OrderOwner::Guest => guest_order_item::Entity::find()
                .filter(guest_order_item::Column::GuestOrderId.eq(order_ref.id))
                .order_by_asc(guest_order_item::Column::CreatedAt)
                .all(conn)
                .await?
                .into_iter()
                .map(|item| OrderLine {
                    variant_id: item.variant_id,
                    sku: item.sku,
                    quantity: item.quantity,
                })
                .collect(),
        };
        Ok(lines)
    }

    /// Online orders placed before `cutoff` that never got a payment callback.
    pub async fn stale_pending_payment<C: ConnectionTrait>(
        conn: &C,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<OrderRef>, DbErr> {
        let mut stale: Vec<OrderRef> = order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::PendingPayment))
            .filter(order::Column::OrderDate.lt(cutoff))
            .order_by_asc(order::Column::OrderDate)
            .all(conn)
            .await?
            .into_iter()
            .map(|m| OrderRef::user(m.id))
            .collect();

        stale.extend(
            guest_order::Entity::find()
                .filter(guest_order::Column::Status.eq(OrderStatus::PendingPayment))
                .filter(guest_order::Column::OrderDate.lt(cutoff))
                .order_by_asc(guest_order::Column::OrderDate)
                .all(conn)
                .await?
                .into_iter()
                .map(|m| OrderRef::guest(m.id)),
        );

        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_reference_round_trips() {
        let id = Uuid::new_v4();
        let user = OrderRef::user(id);
        assert_eq!(user.merchant_reference(), format!("USER_{}", id));
        assert_eq!(
            OrderRef::parse_merchant_reference(&user.merchant_reference()),
            Some(user)
        );

        let guest = OrderRef::guest(id);
        assert_eq!(
            OrderRef::parse_merchant_reference(&guest.merchant_reference()),
            Some(guest)
        );
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert!(OrderRef::parse_merchant_reference("").is_none());
        assert!(OrderRef::parse_merchant_reference("USER").is_none());
        assert!(OrderRef::parse_merchant_reference("USER_not-a-uuid").is_none());
        assert!(OrderRef::parse_merchant_reference(&format!("ADMIN_{}", Uuid::new_v4())).is_none());
        assert!(OrderRef::parse_merchant_reference(&format!("user_{}", Uuid::new_v4())).is_none());
    }
}
