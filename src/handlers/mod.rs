pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_callbacks;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    order_placement::OrderPlacementService, order_status::OrderStatusService,
    payment_gateway::PaymentGateway, payment_reconciler::PaymentReconciler,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub placement: Arc<OrderPlacementService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub order_status: Arc<OrderStatusService>,
    pub gateway: PaymentGateway,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig, event_sender: EventSender) -> Self {
        let gateway = PaymentGateway::new(config.payment_gateway.clone());
        let lock_timeout = config.lock_timeout();

        let placement = Arc::new(OrderPlacementService::new(
            db_pool.clone(),
            gateway.clone(),
            event_sender.clone(),
            lock_timeout,
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            db_pool.clone(),
            gateway.clone(),
            event_sender.clone(),
            lock_timeout,
        ));
        let order_status = Arc::new(OrderStatusService::new(
            db_pool,
            event_sender,
            lock_timeout,
        ));

        Self {
            placement,
            reconciler,
            order_status,
            gateway,
        }
    }
}
