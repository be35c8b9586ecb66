pub mod commerce;
pub mod guest_order;
pub mod guest_order_item;
pub mod order;
pub mod order_item;
pub mod order_state;

pub use order_state::{OrderStatus, PaymentMethod, PaymentStatus};
