use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{OrderStatus, PaymentMethod};
use crate::repositories::OrderRef;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Events are published after commit; a closed channel must not fail the request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.send(event).await {
            warn!(error = %err, "dropping domain event");
        }
    }
}

/// A stock line handed back to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredLine {
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// Domain events published once the owning transaction has committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order: OrderRef,
        order_number: String,
        payment_method: PaymentMethod,
        total_amount: Decimal,
        coupon_code: Option<String>,
        placed_at: DateTime<Utc>,
    },
    PaymentConfirmed {
        order: OrderRef,
        transaction_ref: Option<String>,
        paid_at: DateTime<Utc>,
    },
    OrderCancelled {
        order: OrderRef,
        reason: String,
    },
    StockRestored {
        order: OrderRef,
        lines: Vec<RestoredLine>,
        skipped: usize,
    },
    OrderStatusChanged {
        order: OrderRef,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::PaymentConfirmed { .. } => "payment_confirmed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::StockRestored { .. } => "stock_restored",
            Event::OrderStatusChanged { .. } => "order_status_changed",
        }
    }

    pub fn order(&self) -> &OrderRef {
        match self {
            Event::OrderPlaced { order, .. }
            | Event::PaymentConfirmed { order, .. }
            | Event::OrderCancelled { order, .. }
            | Event::StockRestored { order, .. }
            | Event::OrderStatusChanged { order, .. } => order,
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("solestore.events", 1, "event" => event.name());

        match &event {
            Event::OrderPlaced {
                order,
                order_number,
                payment_method,
                total_amount,
                ..
            } => {
                info!(
                    order = %order,
                    order_number = %order_number,
                    payment_method = %payment_method,
                    total_amount = %total_amount,
                    "order placed"
                );
            }
            Event::PaymentConfirmed {
                order,
                transaction_ref,
                ..
            } => {
                info!(order = %order, transaction_ref = ?transaction_ref, "payment confirmed");
            }
            Event::OrderCancelled { order, reason } => {
                info!(order = %order, reason = %reason, "order cancelled");
            }
            Event::StockRestored {
                order,
                lines,
                skipped,
            } => {
                if *skipped > 0 {
                    warn!(
                        order = %order,
                        restored = lines.len(),
                        skipped = *skipped,
                        "stock restored with lines skipped"
                    );
                } else {
                    info!(order = %order, restored = lines.len(), "stock restored");
                }
            }
            Event::OrderStatusChanged { order, from, to } => {
                info!(order = %order, from = %from, to = %to, "order status changed");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_the_processor() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order = OrderRef::guest(Uuid::new_v4());

        sender
            .send(Event::OrderCancelled {
                order: order.clone(),
                reason: "payment failed".into(),
            })
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "order_cancelled");
        assert_eq!(received.order(), &order);
    }

    #[tokio::test]
    async fn closed_channel_is_not_fatal() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender
            .send(Event::OrderCancelled {
                order: OrderRef::user(Uuid::new_v4()),
                reason: "test".into(),
            })
            .await
            .is_err());
        sender
            .send_or_log(Event::OrderCancelled {
                order: OrderRef::user(Uuid::new_v4()),
                reason: "test".into(),
            })
            .await;
    }
}
