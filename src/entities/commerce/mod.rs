//! Commerce entities: catalog, carts and coupons.
pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod coupon_category;
pub mod coupon_product;
pub mod coupon_usage_log;
pub mod product;
pub mod product_variant;
pub mod user_voucher;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use coupon::{CouponScope, DiscountType, Entity as Coupon, Model as CouponModel};
pub use coupon_usage_log::{Entity as CouponUsageLog, Model as CouponUsageLogModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use user_voucher::{Entity as UserVoucher, Model as UserVoucherModel};
