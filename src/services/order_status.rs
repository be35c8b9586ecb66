use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_locked, classify_db_error},
    entities::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{OrderPatch, OrderRef, OrderRepository, OrderSnapshot},
    services::inventory_ledger::InventoryLedger,
};

/// Administrative status override for both order tables.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    lock_timeout: Duration,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, lock_timeout: Duration) -> Self {
        Self {
            db,
            event_sender,
            lock_timeout,
        }
    }

    /// Moves an order to `new_status` if the state machine allows it.
    ///
    /// Shipping may attach a tracking code, cancelling returns the stock and
    /// delivering a cash-on-delivery order marks it paid.
    #[instrument(skip(self, tracking_code), fields(order = %order_ref, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_ref: OrderRef,
        new_status: OrderStatus,
        tracking_code: Option<String>,
    ) -> Result<OrderSnapshot, ServiceError> {
        let tracking_code = tracking_code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());
        if tracking_code.is_some() && new_status != OrderStatus::Shipped {
            return Err(ServiceError::ValidationError(
                "a tracking code can only be attached when shipping".to_string(),
            ));
        }

        let txn = begin_locked(&self.db, self.lock_timeout).await?;

        let order = OrderRepository::find_for_update(&txn, &order_ref)
            .await
            .map_err(classify_db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_ref)))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            warn!(from = %old_status, to = %new_status, "rejected status transition");
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition from status '{}' to '{}'",
                old_status, new_status
            )));
        }

        let mut patch = OrderPatch {
            status: Some(new_status),
            tracking_code,
            ..Default::default()
        };
        let mut paid_now = None;
        if new_status == OrderStatus::Delivered
            && order.payment_method == PaymentMethod::Cod
            && order.payment_status == PaymentStatus::Unpaid
        {
            let now = Utc::now();
            patch.payment_status = Some(PaymentStatus::Paid);
            patch.paid_at = Some(now);
            paid_now = Some(now);
        }

        let updated = OrderRepository::apply_patch(&txn, &order_ref, patch)
            .await
            .map_err(classify_db_error)?;

        let mut events = vec![Event::OrderStatusChanged {
            order: order_ref,
            from: old_status,
            to: new_status,
        }];
        if let Some(paid_at) = paid_now {
            events.push(Event::PaymentConfirmed {
                order: order_ref,
                transaction_ref: None,
                paid_at,
            });
        }
        if new_status == OrderStatus::Cancelled {
            if order.payment_status == PaymentStatus::Paid {
                warn!(order = %order_ref, "paid order cancelled, refund manually");
            }
            events.push(Event::OrderCancelled {
                order: order_ref,
                reason: "cancelled by an administrator".to_string(),
            });
            if let Some(restoration) = InventoryLedger::restore_order(&txn, &order_ref).await {
                events.push(Event::StockRestored {
                    order: order_ref,
                    lines: restoration.restored,
                    skipped: restoration.skipped,
                });
            }
        }

        txn.commit().await.map_err(classify_db_error)?;

        info!(from = %old_status, to = %new_status, "order status updated");
        metrics::counter!("solestore.orders.status_changes", 1, "to" => new_status.to_string());

        for event in events {
            self.event_sender.send_or_log(event).await;
        }

        Ok(updated)
    }
}
