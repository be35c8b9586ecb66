#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use solestore_api::{
    config::AppConfig,
    db,
    entities::commerce::{
        cart, cart_item, coupon, coupon_category, product, product_variant, user_voucher,
        CouponScope, DiscountType,
    },
    entities::PaymentMethod,
    events::{self, EventSender},
    repositories::{OrderRef, OrderRepository, OrderSnapshot},
    services::{
        order_builder::{Buyer, GuestContact},
        order_placement::{CheckoutLine, PlaceOrderCommand},
        payment_gateway::{amount_in_minor_units, CallbackParams, SECURE_HASH},
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const SHIPPING_FEE: i64 = 30_000;

/// Seeded catalog row: a variant and where it sits in the catalog.
#[derive(Debug, Clone, Copy)]
pub struct SeededVariant {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub price: Decimal,
}

impl SeededVariant {
    pub fn line(&self, quantity: i32) -> CheckoutLine {
        CheckoutLine {
            variant_id: self.variant_id,
            quantity,
            unit_price: self.price,
        }
    }
}

/// Coupon columns a test usually cares about; the rest get permissive defaults.
#[derive(Debug, Clone)]
pub struct CouponSeed {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_purchase_amount: Decimal,
    pub expiry_date: DateTime<Utc>,
    pub max_uses: i32,
    pub uses_per_user: i32,
    pub is_public: bool,
    pub scope: CouponScope,
    pub is_active: bool,
}

impl CouponSeed {
    pub fn percentage(code: &str, percent: i64) -> Self {
        Self {
            code: code.to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::from(percent),
            min_purchase_amount: Decimal::ZERO,
            expiry_date: Utc::now() + Duration::days(30),
            max_uses: 0,
            uses_per_user: 0,
            is_public: true,
            scope: CouponScope::All,
            is_active: true,
        }
    }

    pub fn fixed(code: &str, amount: i64) -> Self {
        Self {
            discount_type: DiscountType::FixedAmount,
            discount_value: Decimal::from(amount),
            ..Self::percentage(code, 0)
        }
    }
}

/// Helper harness backed by a throwaway SQLite file with a single pooled
/// connection, so transactions from concurrent tasks queue for it.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    db_file: PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_file = std::env::temp_dir().join(format!("solestore-test-{}.db", Uuid::new_v4()));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.payment_gateway.tmn_code = "SOLETEST".to_string();
        cfg.payment_gateway.hash_secret = "integration-test-hash-secret".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = solestore_api::app_router(state.clone());

        Self {
            router,
            state,
            db_file,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.state.db.as_ref()
    }

    /// Send a request against the router with optional JSON body and headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_variant(&self, sku: &str, price: i64, stock: i32) -> SeededVariant {
        self.seed_variant_in(sku, price, stock, Uuid::new_v4()).await
    }

    pub async fn seed_variant_in(
        &self,
        sku: &str,
        price: i64,
        stock: i32,
        category_id: Uuid,
    ) -> SeededVariant {
        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Sneaker {}", sku)),
            category_id: Set(category_id),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed product");

        let price = Decimal::from(price);
        let variant = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            sku: Set(sku.to_string()),
            size: Set("42".to_string()),
            color: Set("red".to_string()),
            price: Set(price),
            stock_quantity: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed product variant");

        SeededVariant {
            variant_id: variant.id,
            product_id: product.id,
            category_id,
            price,
        }
    }

    pub async fn seed_coupon(&self, seed: CouponSeed) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(seed.code),
            discount_type: Set(seed.discount_type),
            discount_value: Set(seed.discount_value),
            min_purchase_amount: Set(seed.min_purchase_amount),
            expiry_date: Set(seed.expiry_date),
            max_uses: Set(seed.max_uses),
            used_count: Set(0),
            uses_per_user: Set(seed.uses_per_user),
            is_public: Set(seed.is_public),
            scope: Set(seed.scope),
            is_active: Set(seed.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed coupon")
    }

    pub async fn restrict_coupon_to_category(&self, coupon_id: Uuid, category_id: Uuid) {
        coupon_category::ActiveModel {
            coupon_id: Set(coupon_id),
            category_id: Set(category_id),
        }
        .insert(self.db())
        .await
        .expect("seed coupon category");
    }

    pub async fn grant_voucher(&self, user_id: Uuid, coupon_id: Uuid) -> Uuid {
        let voucher = user_voucher::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            coupon_id: Set(coupon_id),
            is_used: Set(false),
            claimed_at: Set(Utc::now()),
            used_at: Set(None),
        }
        .insert(self.db())
        .await
        .expect("seed voucher");
        voucher.id
    }

    pub async fn seed_cart(&self, user_id: Option<Uuid>, lines: &[(Uuid, i32)]) -> Uuid {
        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed cart");

        for (variant_id, quantity) in lines {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                variant_id: Set(*variant_id),
                quantity: Set(*quantity),
                created_at: Set(now),
            }
            .insert(self.db())
            .await
            .expect("seed cart item");
        }
        cart.id
    }

    pub async fn stock_of(&self, variant_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(self.db())
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock_quantity
    }

    pub async fn coupon(&self, coupon_id: Uuid) -> coupon::Model {
        coupon::Entity::find_by_id(coupon_id)
            .one(self.db())
            .await
            .expect("load coupon")
            .expect("coupon exists")
    }

    pub async fn voucher(&self, voucher_id: Uuid) -> user_voucher::Model {
        user_voucher::Entity::find_by_id(voucher_id)
            .one(self.db())
            .await
            .expect("load voucher")
            .expect("voucher exists")
    }

    pub async fn order(&self, order: &OrderRef) -> OrderSnapshot {
        OrderRepository::find(self.db(), order)
            .await
            .expect("load order")
            .expect("order exists")
    }

    /// Callback fields as the gateway would send them, signed with the test secret.
    pub fn signed_callback(
        &self,
        order: &OrderRef,
        amount: Decimal,
        response_code: &str,
    ) -> CallbackParams {
        let mut fields = BTreeMap::new();
        fields.insert(
            "vnp_Amount".to_string(),
            amount_in_minor_units(amount)
                .expect("amount in range")
                .to_string(),
        );
        fields.insert("vnp_BankCode".to_string(), "NCB".to_string());
        fields.insert("vnp_ResponseCode".to_string(), response_code.to_string());
        fields.insert("vnp_TmnCode".to_string(), "SOLETEST".to_string());
        fields.insert("vnp_TransactionNo".to_string(), "14422574".to_string());
        fields.insert(
            "vnp_TransactionStatus".to_string(),
            response_code.to_string(),
        );
        fields.insert("vnp_TxnRef".to_string(), order.merchant_reference());

        let signature = self
            .state
            .services
            .gateway
            .sign_fields(&fields)
            .expect("sign callback");
        CallbackParams {
            fields,
            signature: Some(signature),
        }
    }

    /// Query string for a callback, hash included, ready to append to a URL.
    pub fn callback_query(params: &CallbackParams) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &params.fields {
            serializer.append_pair(key, value);
        }
        if let Some(signature) = &params.signature {
            serializer.append_pair(SECURE_HASH, signature);
        }
        serializer.finish()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

pub fn guest(email: &str) -> Buyer {
    Buyer::Guest(GuestContact {
        name: "Nguyen Van A".to_string(),
        email: email.to_string(),
        phone: "0901234567".to_string(),
    })
}

pub fn command(
    buyer: Buyer,
    lines: Vec<CheckoutLine>,
    coupon_code: Option<&str>,
    payment_method: PaymentMethod,
) -> PlaceOrderCommand {
    PlaceOrderCommand {
        buyer,
        lines,
        coupon_code: coupon_code.map(str::to_string),
        payment_method,
        shipping_provider_id: Uuid::new_v4(),
        shipping_address: "12 Nguyen Hue, District 1, Ho Chi Minh City".to_string(),
        shipping_fee: Decimal::from(SHIPPING_FEE),
        cart_id: None,
        client_ip: "10.0.0.1".to_string(),
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("response body is json")
}
