//! Order state machine.
//!
//! `OrderStatus` and `PaymentStatus` are two orthogonal axes stored on both
//! `orders` and `guest_orders`. The legal moves live here so the placement
//! transaction, the payment reconciler and the admin override all agree on
//! them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Fulfilment status of an order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending_payment")]
    PendingPayment,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Whether `self -> next` is a legal move.
    ///
    /// Identity moves are not transitions and return `false`; callers treat
    /// them as no-ops before asking.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (PendingPayment, Pending)
                | (PendingPayment, Confirmed)
                | (PendingPayment, Cancelled)
                | (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Shipped)
                | (Confirmed, Cancelled)
                | (Shipped, Delivered)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Delivered)
    }

    /// Statuses a successful payment advances to `Confirmed`.
    pub fn awaits_confirmation(self) -> bool {
        matches!(self, OrderStatus::PendingPayment | OrderStatus::Pending)
    }
}

/// Payment status, independent of fulfilment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentStatus {
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl PaymentStatus {
    /// `Unpaid` is the only non-terminal payment status.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Unpaid, PaymentStatus::Paid)
                | (PaymentStatus::Unpaid, PaymentStatus::Failed)
        )
    }
}

/// How the buyer pays. Online methods go through the gateway redirect.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cod")]
    Cod,
    #[sea_orm(string_value = "vnpay")]
    Vnpay,
}

impl PaymentMethod {
    pub fn is_online(self) -> bool {
        matches!(self, PaymentMethod::Vnpay)
    }

    /// Status pair a freshly placed order starts with.
    pub fn initial_statuses(self) -> (OrderStatus, PaymentStatus) {
        match self {
            PaymentMethod::Cod => (OrderStatus::Pending, PaymentStatus::Unpaid),
            PaymentMethod::Vnpay => (OrderStatus::PendingPayment, PaymentStatus::Unpaid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;
    use sea_orm::Iterable;

    #[rstest]
    #[case(OrderStatus::PendingPayment, OrderStatus::Pending, true)]
    #[case(OrderStatus::PendingPayment, OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Pending, OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Confirmed, OrderStatus::Pending, false)]
    fn order_transitions(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn cancelled_is_a_dead_end() {
        for next in OrderStatus::iter() {
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
        }
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn payment_status_only_leaves_unpaid() {
        assert!(PaymentStatus::Unpaid.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Unpaid.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Paid));
    }

    #[test]
    fn initial_statuses_follow_payment_method() {
        assert_eq!(
            PaymentMethod::Cod.initial_statuses(),
            (OrderStatus::Pending, PaymentStatus::Unpaid)
        );
        assert_eq!(
            PaymentMethod::Vnpay.initial_statuses(),
            (OrderStatus::PendingPayment, PaymentStatus::Unpaid)
        );
    }

    #[test]
    fn statuses_parse_from_snake_case() {
        assert_eq!(
            OrderStatus::from_str("pending_payment").unwrap(),
            OrderStatus::PendingPayment
        );
        assert_eq!(OrderStatus::from_str("SHIPPED").unwrap(), OrderStatus::Shipped);
        assert!(OrderStatus::from_str("refunded").is_err());
        assert_eq!(OrderStatus::Cancelled.to_string(), "cancelled");
    }
}
