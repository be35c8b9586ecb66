//! Applies gateway callbacks (browser return and IPN) to orders.
//!
//! Both triggers land in [`PaymentReconciler::reconcile`]. The order row is
//! locked before anything is decided, so a return and an IPN for the same
//! order serialize and only the first one mutates it.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DatabaseTransaction};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::db::{begin_locked, classify_db_error};
use crate::entities::{OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{OrderPatch, OrderRef, OrderRepository, OrderSnapshot};
use crate::services::inventory_ledger::InventoryLedger;
use crate::services::payment_gateway::{amount_in_minor_units, CallbackParams, PaymentGateway};

/// What a callback did to its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Confirmed,
    AlreadyProcessed,
    Cancelled,
    AlreadyCancelled,
    InvalidSignature,
    OrderNotFound,
    InvalidAmount,
    UnknownError,
}

/// Body the gateway expects from the IPN endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpnResponse {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

impl CallbackOutcome {
    pub fn ipn_response(self) -> IpnResponse {
        let (rsp_code, message) = match self {
            CallbackOutcome::Confirmed | CallbackOutcome::Cancelled => ("00", "Confirm Success"),
            CallbackOutcome::AlreadyProcessed | CallbackOutcome::AlreadyCancelled => {
                ("02", "Order already confirmed")
            }
            CallbackOutcome::OrderNotFound => ("01", "Order not found"),
            CallbackOutcome::InvalidAmount => ("04", "Invalid amount"),
            CallbackOutcome::InvalidSignature => ("97", "Invalid signature"),
            CallbackOutcome::UnknownError => ("99", "Unknown error"),
        };
        IpnResponse { rsp_code, message }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallbackOutcome::Confirmed => "confirmed",
            CallbackOutcome::AlreadyProcessed => "already_processed",
            CallbackOutcome::Cancelled => "cancelled",
            CallbackOutcome::AlreadyCancelled => "already_cancelled",
            CallbackOutcome::InvalidSignature => "invalid_signature",
            CallbackOutcome::OrderNotFound => "order_not_found",
            CallbackOutcome::InvalidAmount => "invalid_amount",
            CallbackOutcome::UnknownError => "unknown_error",
        }
    }
}

/// Outcome plus the order it concerned, when the reference could be parsed.
///
/// `paid` reflects the stored payment status once the callback has been
/// applied, not the outcome code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub outcome: CallbackOutcome,
    pub order: Option<OrderRef>,
    pub paid: bool,
}

impl Reconciliation {
    fn new(outcome: CallbackOutcome, order: Option<OrderRef>, paid: bool) -> Self {
        Self {
            outcome,
            order,
            paid,
        }
    }
}

struct Applied {
    outcome: CallbackOutcome,
    events: Vec<Event>,
    paid: bool,
}

impl Applied {
    fn unchanged(outcome: CallbackOutcome, order: &OrderSnapshot) -> Self {
        Self {
            outcome,
            events: Vec::new(),
            paid: order.payment_status == PaymentStatus::Paid,
        }
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    gateway: PaymentGateway,
    event_sender: EventSender,
    lock_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: PaymentGateway,
        event_sender: EventSender,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            lock_timeout,
        }
    }

    /// Never fails: database trouble is logged and reported as
    /// [`CallbackOutcome::UnknownError`] so the gateway retries.
    #[instrument(skip(self, params), fields(txn_ref = params.txn_ref().unwrap_or("")))]
    pub async fn reconcile(&self, params: &CallbackParams) -> Reconciliation {
        if !self.gateway.verify(params) {
            warn!("gateway callback with invalid signature");
            return self.finish(Reconciliation::new(CallbackOutcome::InvalidSignature, None, false));
        }

        let Some(order_ref) = params.txn_ref().and_then(OrderRef::parse_merchant_reference)
        else {
            warn!("gateway callback with unparseable merchant reference");
            return self.finish(Reconciliation::new(CallbackOutcome::OrderNotFound, None, false));
        };

        let (outcome, paid) = match self.apply(params, &order_ref).await {
            Ok(applied) => {
                for event in applied.events {
                    self.event_sender.send_or_log(event).await;
                }
                (applied.outcome, applied.paid)
            }
            Err(err) => {
                error!(order = %order_ref, error = %err, "payment callback failed");
                (CallbackOutcome::UnknownError, false)
            }
        };

        self.finish(Reconciliation::new(outcome, Some(order_ref), paid))
    }

    fn finish(&self, reconciliation: Reconciliation) -> Reconciliation {
        metrics::counter!(
            "solestore.payments.callbacks",
            1,
            "outcome" => reconciliation.outcome.as_str()
        );
        reconciliation
    }

    async fn apply(
        &self,
        params: &CallbackParams,
        order_ref: &OrderRef,
    ) -> Result<Applied, ServiceError> {
        let txn = begin_locked(&self.db, self.lock_timeout).await?;

        let Some(order) = OrderRepository::find_for_update(&txn, order_ref)
            .await
            .map_err(classify_db_error)?
        else {
            return Ok(Applied {
                outcome: CallbackOutcome::OrderNotFound,
                events: Vec::new(),
                paid: false,
            });
        };

        if order.payment_status == PaymentStatus::Paid {
            info!(order = %order_ref, "duplicate payment callback ignored");
            return Ok(Applied::unchanged(CallbackOutcome::AlreadyProcessed, &order));
        }

        // a cancelled order stays cancelled whatever amount a replay carries
        if order.status == OrderStatus::Cancelled {
            if params.is_success() {
                warn!(
                    order = %order_ref,
                    transaction_no = ?params.transaction_no(),
                    "payment succeeded for a cancelled order, refund manually"
                );
            }
            return Ok(Applied::unchanged(CallbackOutcome::AlreadyCancelled, &order));
        }

        if amount_in_minor_units(order.total_amount) != params.amount() {
            warn!(
                order = %order_ref,
                expected = %order.total_amount,
                received = ?params.amount(),
                "gateway amount does not match order total"
            );
            return Ok(Applied::unchanged(CallbackOutcome::InvalidAmount, &order));
        }

        let now = Utc::now();
        let applied = if params.is_success() {
            self.confirm(&txn, &order, params, now).await?
        } else {
            self.fail(&txn, &order).await?
        };

        txn.commit().await.map_err(classify_db_error)?;
        Ok(applied)
    }

    async fn confirm(
        &self,
        txn: &DatabaseTransaction,
        order: &OrderSnapshot,
        params: &CallbackParams,
        now: DateTime<Utc>,
    ) -> Result<Applied, ServiceError> {
        let next_status = order
            .status
            .awaits_confirmation()
            .then_some(OrderStatus::Confirmed);
        let transaction_ref = params.transaction_no().map(str::to_string);

        OrderRepository::apply_patch(
            txn,
            &order.order,
            OrderPatch {
                status: next_status,
                payment_status: Some(PaymentStatus::Paid),
                paid_at: Some(now),
                gateway_transaction_ref: transaction_ref.clone(),
                ..Default::default()
            },
        )
        .await
        .map_err(classify_db_error)?;

        info!(order = %order.order, "payment confirmed");

        let mut events = vec![Event::PaymentConfirmed {
            order: order.order,
            transaction_ref,
            paid_at: now,
        }];
        if let Some(to) = next_status {
            events.push(Event::OrderStatusChanged {
                order: order.order,
                from: order.status,
                to,
            });
        }
        Ok(Applied {
            outcome: CallbackOutcome::Confirmed,
            events,
            paid: true,
        })
    }

    async fn fail(
        &self,
        txn: &DatabaseTransaction,
        order: &OrderSnapshot,
    ) -> Result<Applied, ServiceError> {
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            warn!(
                order = %order.order,
                status = %order.status,
                "failed payment callback for an order past cancellation"
            );
            return Ok(Applied::unchanged(CallbackOutcome::AlreadyProcessed, order));
        }

        let events = cancel_unpaid_order(txn, order, "payment failed or was cancelled").await?;
        Ok(Applied {
            outcome: CallbackOutcome::Cancelled,
            events,
            paid: false,
        })
    }

    /// Cancels online orders still waiting for payment at `cutoff`. Each order
    /// gets its own transaction; returns how many were cancelled.
    #[instrument(skip(self))]
    pub async fn expire_stale_payments(&self, cutoff: DateTime<Utc>) -> Result<usize, ServiceError> {
        let stale = OrderRepository::stale_pending_payment(self.db.as_ref(), cutoff).await?;
        let mut expired = 0;

        for order_ref in stale {
            match self.expire_one(&order_ref).await {
                Ok(Some(events)) => {
                    expired += 1;
                    for event in events {
                        self.event_sender.send_or_log(event).await;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!(order = %order_ref, error = %err, "failed to expire pending payment");
                }
            }
        }

        if expired > 0 {
            info!(expired, "expired unpaid online orders");
            metrics::counter!("solestore.payments.expired", expired as u64);
        }
        Ok(expired)
    }

    async fn expire_one(&self, order_ref: &OrderRef) -> Result<Option<Vec<Event>>, ServiceError> {
        let txn = begin_locked(&self.db, self.lock_timeout).await?;

        let Some(order) = OrderRepository::find_for_update(&txn, order_ref)
            .await
            .map_err(classify_db_error)?
        else {
            return Ok(None);
        };
        // a callback may have won the lock since the scan
        if order.status != OrderStatus::PendingPayment
            || order.payment_status != PaymentStatus::Unpaid
        {
            return Ok(None);
        }

        let events = cancel_unpaid_order(&txn, &order, "payment window expired").await?;
        txn.commit().await.map_err(classify_db_error)?;
        Ok(Some(events))
    }
}

/// Marks an unpaid order `Failed`/`Cancelled` and hands its stock back.
async fn cancel_unpaid_order(
    txn: &DatabaseTransaction,
    order: &OrderSnapshot,
    reason: &str,
) -> Result<Vec<Event>, ServiceError> {
    OrderRepository::apply_patch(
        txn,
        &order.order,
        OrderPatch {
            status: Some(OrderStatus::Cancelled),
            payment_status: Some(PaymentStatus::Failed),
            ..Default::default()
        },
    )
    .await
    .map_err(classify_db_error)?;

    info!(order = %order.order, reason, "order cancelled");

    let mut events = vec![
        Event::OrderStatusChanged {
            order: order.order,
            from: order.status,
            to: OrderStatus::Cancelled,
        },
        Event::OrderCancelled {
            order: order.order,
            reason: reason.to_string(),
        },
    ];
    if let Some(restoration) = InventoryLedger::restore_order(txn, &order.order).await {
        events.push(Event::StockRestored {
            order: order.order,
            lines: restoration.restored,
            skipped: restoration.skipped,
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CallbackOutcome::Confirmed, "00", "Confirm Success")]
    #[case(CallbackOutcome::Cancelled, "00", "Confirm Success")]
    #[case(CallbackOutcome::AlreadyProcessed, "02", "Order already confirmed")]
    #[case(CallbackOutcome::AlreadyCancelled, "02", "Order already confirmed")]
    #[case(CallbackOutcome::OrderNotFound, "01", "Order not found")]
    #[case(CallbackOutcome::InvalidAmount, "04", "Invalid amount")]
    #[case(CallbackOutcome::InvalidSignature, "97", "Invalid signature")]
    #[case(CallbackOutcome::UnknownError, "99", "Unknown error")]
    fn ipn_codes(#[case] outcome: CallbackOutcome, #[case] code: &str, #[case] message: &str) {
        let response = outcome.ipn_response();
        assert_eq!(response.rsp_code, code);
        assert_eq!(response.message, message);
    }

    #[test]
    fn ipn_body_uses_gateway_field_names() {
        let body = serde_json::to_value(CallbackOutcome::Confirmed.ipn_response()).unwrap();
        assert_eq!(body, serde_json::json!({"RspCode": "00", "Message": "Confirm Success"}));
    }
}
