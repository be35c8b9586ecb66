//! Turns a validated, priced order into the rows that get inserted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, Set};
use uuid::Uuid;

use crate::entities::{guest_order, guest_order_item, order, order_item, PaymentMethod};
use crate::repositories::OrderRef;
use crate::services::coupons::CouponHolder;

/// Contact details of a buyer without an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buyer {
    Registered { user_id: Uuid },
    Guest(GuestContact),
}

impl Buyer {
    pub fn coupon_holder(&self) -> CouponHolder {
        match self {
            Buyer::Registered { user_id } => CouponHolder::User(*user_id),
            Buyer::Guest(contact) => CouponHolder::Guest(contact.email.to_lowercase()),
        }
    }
}

/// Money breakdown of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// `total = max(0, subtotal + shipping_fee - discount)`
    pub fn compute(subtotal: Decimal, shipping_fee: Decimal, discount: Decimal) -> Self {
        let total = (subtotal + shipping_fee - discount).max(Decimal::ZERO);
        Self {
            subtotal,
            shipping_fee,
            discount,
            total,
        }
    }
}

/// A line at the price it is sold for.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub variant_id: Uuid,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub buyer: Buyer,
    pub lines: Vec<PricedLine>,
    pub totals: OrderTotals,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_provider_id: Uuid,
    pub shipping_address: String,
}

/// Header and item rows ready to insert, for one of the two order tables.
#[derive(Debug, Clone)]
pub enum BuiltOrder {
    User {
        order: order::ActiveModel,
        items: Vec<order_item::ActiveModel>,
        order_ref: OrderRef,
        order_number: String,
    },
    Guest {
        order: guest_order::ActiveModel,
        items: Vec<guest_order_item::ActiveModel>,
        order_ref: OrderRef,
        order_number: String,
    },
}

impl BuiltOrder {
    pub fn order_ref(&self) -> &OrderRef {
        match self {
            BuiltOrder::User { order_ref, .. } | BuiltOrder::Guest { order_ref, .. } => order_ref,
        }
    }

    pub fn order_number(&self) -> &str {
        match self {
            BuiltOrder::User { order_number, .. } | BuiltOrder::Guest { order_number, .. } => {
                order_number
            }
        }
    }

    /// Inserts the header, then all items in one statement.
    pub async fn insert<C: ConnectionTrait>(self, conn: &C) -> Result<OrderRef, DbErr> {
        match self {
            BuiltOrder::User {
                order,
                items,
                order_ref,
                ..
            } => {
                order.insert(conn).await?;
                if !items.is_empty() {
                    order_item::Entity::insert_many(items).exec(conn).await?;
                }
                Ok(order_ref)
            }
            BuiltOrder::Guest {
                order,
                items,
                order_ref,
                ..
            } => {
                order.insert(conn).await?;
                if !items.is_empty() {
                    guest_order_item::Entity::insert_many(items)
                        .exec(conn)
                        .await?;
                }
                Ok(order_ref)
            }
        }
    }
}

pub struct OrderAggregateBuilder;

impl OrderAggregateBuilder {
    pub fn order_number(order_id: Uuid, now: DateTime<Utc>) -> String {
        let suffix = order_id.simple().to_string()[..8].to_uppercase();
        format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
    }

    pub fn build(draft: OrderDraft, now: DateTime<Utc>) -> BuiltOrder {
        let order_id = Uuid::new_v4();
        let order_number = Self::order_number(order_id, now);
        let (status, payment_status) = draft.payment_method.initial_statuses();
        let totals = draft.totals;

        match draft.buyer {
            Buyer::Registered { user_id } => {
                let order = order::ActiveModel {
                    id: Set(order_id),
                    order_number: Set(order_number.clone()),
                    user_id: Set(user_id),
                    subtotal: Set(totals.subtotal),
                    shipping_fee: Set(totals.shipping_fee),
                    discount_amount: Set(totals.discount),
                    total_amount: Set(totals.total),
                    coupon_code: Set(draft.coupon_code),
                    payment_method: Set(draft.payment_method),
                    shipping_provider_id: Set(draft.shipping_provider_id),
                    shipping_address: Set(draft.shipping_address),
                    tracking_code: Set(None),
                    status: Set(status),
                    payment_status: Set(payment_status),
                    gateway_transaction_ref: Set(None),
                    order_date: Set(now),
                    paid_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                let items = draft
                    .lines
                    .into_iter()
                    .map(|line| order_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order_id),
                        variant_id: Set(Some(line.variant_id)),
                        sku: Set(line.sku),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        created_at: Set(now),
                    })
                    .collect();
                BuiltOrder::User {
                    order,
                    items,
                    order_ref: OrderRef::user(order_id),
                    order_number,
                }
            }
            Buyer::Guest(contact) => {
                let order = guest_order::ActiveModel {
                    id: Set(order_id),
                    order_number: Set(order_number.clone()),
                    guest_name: Set(contact.name),
                    guest_email: Set(contact.email.to_lowercase()),
                    guest_phone: Set(contact.phone),
                    subtotal: Set(totals.subtotal),
                    shipping_fee: Set(totals.shipping_fee),
                    discount_amount: Set(totals.discount),
                    total_amount: Set(totals.total),
                    coupon_code: Set(draft.coupon_code),
                    payment_method: Set(draft.payment_method),
                    shipping_provider_id: Set(draft.shipping_provider_id),
                    shipping_address: Set(draft.shipping_address),
                    tracking_code: Set(None),
                    status: Set(status),
                    payment_status: Set(payment_status),
                    gateway_transaction_ref: Set(None),
                    order_date: Set(now),
                    paid_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                let items = draft
                    .lines
                    .into_iter()
                    .map(|line| guest_order_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        guest_order_id: Set(order_id),
                        variant_id: Set(Some(line.variant_id)),
                        sku: Set(line.sku),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        created_at: Set(now),
                    })
                    .collect();
                BuiltOrder::Guest {
                    order,
                    items,
                    order_ref: OrderRef::guest(order_id),
                    order_number,
                }
            }
        }
    }
}
