// Pricing and stock
pub mod coupons;
pub mod inventory_ledger;
pub mod order_builder;

// Checkout and status changes
pub mod order_placement;
pub mod order_status;

// Payment gateway
pub mod payment_gateway;
pub mod payment_reconciler;
