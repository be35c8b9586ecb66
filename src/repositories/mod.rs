pub mod order_repository;

pub use order_repository::{
    OrderLine, OrderOwner, OrderPatch, OrderRef, OrderRepository, OrderSnapshot,
};
