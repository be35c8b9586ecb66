//! Checkout: turns a buyer's lines into a persisted order in one transaction.
//!
//! Stock, coupon and order rows are all written on the same transaction. If
//! any step fails the transaction is dropped without commit and the caller
//! gets that step's error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{begin_locked, classify_db_error, reclassify};
use crate::entities::commerce::{cart, cart_item};
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::OrderRef;
use crate::services::coupons::{CouponEngine, CouponEvaluation, CouponLine};
use crate::services::inventory_ledger::{InventoryLedger, StockRequest, VariantSnapshot};
use crate::services::order_builder::{
    Buyer, OrderAggregateBuilder, OrderDraft, OrderTotals, PricedLine,
};
use crate::services::payment_gateway::{PaymentGateway, PaymentRequest};

/// One requested line, at the price the buyer was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutLine {
    pub variant_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderCommand {
    pub buyer: Buyer,
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_provider_id: Uuid,
    pub shipping_address: String,
    pub shipping_fee: Decimal,
    pub cart_id: Option<Uuid>,
    pub client_ip: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order: OrderRef,
    pub order_number: String,
    pub totals: OrderTotals,
    /// Hosted payment page, for online payment methods only.
    pub payment_url: Option<String>,
}

#[derive(Clone)]
pub struct OrderPlacementService {
    db: Arc<DatabaseConnection>,
    gateway: PaymentGateway,
    event_sender: EventSender,
    lock_timeout: Duration,
}

impl OrderPlacementService {
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

    /// Places an order or fails with nothing written.
    #[instrument(skip(self, command), fields(lines = command.lines.len(), method = %command.payment_method))]
    pub async fn place(&self, command: PlaceOrderCommand) -> Result<PlacedOrder, ServiceError> {
        validate_command(&command)?;
        let now = Utc::now();

        let txn = begin_locked(&self.db, self.lock_timeout).await?;
        let placed = match self.place_in(&txn, &command, now).await {
            Ok(placed) => placed,
            Err(err) => {
                // dropping `txn` rolls everything back
                let err = reclassify(err);
                debug!(error = %err, "order placement rolled back");
                metrics::counter!("solestore.orders.rejected", 1, "reason" => err.code());
                return Err(err);
            }
        };
        txn.commit().await.map_err(classify_db_error)?;

        info!(
            order = %placed.order,
            order_number = %placed.order_number,
            total = %placed.totals.total,
            "order placed"
        );
        metrics::counter!(
            "solestore.orders.placed",
            1,
            "payment_method" => command.payment_method.to_string()
        );

        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order: placed.order,
                order_number: placed.order_number.clone(),
                payment_method: command.payment_method,
                total_amount: placed.totals.total,
                coupon_code: command.coupon_code.clone(),
                placed_at: now,
            })
            .await;

        Ok(placed)
    }

    async fn place_in(
        &self,
        txn: &DatabaseTransaction,
        command: &PlaceOrderCommand,
        now: DateTime<Utc>,
    ) -> Result<PlacedOrder, ServiceError> {
        let lines = merge_lines(&command.lines)?;
        let requests: Vec<StockRequest> = lines
            .iter()
            .map(|line| StockRequest {
                variant_id: line.variant_id,
                quantity: line.quantity,
            })
            .collect();

        let variants = InventoryLedger::lock_and_check(txn, &requests).await?;
        let priced = price_lines(&lines, &variants)?;
        let subtotal: Decimal = priced.iter().map(PricedLine::line_total).sum();

        let holder = command.buyer.coupon_holder();
        let coupon = match normalized_code(command.coupon_code.as_deref()) {
            Some(code) => {
                let (coupon, evaluation) = CouponEngine::evaluate_code(
                    txn,
                    code,
                    &holder,
                    coupon_lines(&lines, &variants),
                    true,
                    now,
                )
                .await?;
                let discount = evaluation.into_discount()?;
                coupon.map(|coupon| (coupon, discount))
            }
            None => None,
        };
        let discount = coupon.as_ref().map_or(Decimal::ZERO, |(_, d)| *d);
        let totals = OrderTotals::compute(subtotal, command.shipping_fee, discount);

        let built = OrderAggregateBuilder::build(
            OrderDraft {
                buyer: command.buyer.clone(),
                lines: priced,
                totals,
                coupon_code: coupon.as_ref().map(|(c, _)| c.code.clone()),
                payment_method: command.payment_method,
                shipping_provider_id: command.shipping_provider_id,
                shipping_address: command.shipping_address.clone(),
            },
            now,
        );
        let order_number = built.order_number().to_string();
        let order = built.insert(txn).await?;

        for request in &requests {
            InventoryLedger::reserve(txn, request.variant_id, request.quantity).await?;
        }

        if let Some(cart_id) = command.cart_id {
            clear_purchased_cart_lines(txn, cart_id, &command.buyer, &requests).await?;
        }

        if let Some((coupon, discount)) = &coupon {
            CouponEngine::record_redemption(txn, coupon, &holder, &order, *discount, now).await?;
        }

        let payment_url = if command.payment_method.is_online() {
            Some(self.gateway.payment_url(
                &PaymentRequest {
                    order: &order,
                    order_number: &order_number,
                    amount: totals.total,
                    client_ip: &command.client_ip,
                },
                now,
            )?)
        } else {
            None
        };

        Ok(PlacedOrder {
            order,
            order_number,
            totals,
            payment_url,
        })
    }

    /// Evaluates `code` against the lines at current prices. Takes no locks
    /// and writes nothing.
    #[instrument(skip(self, buyer, lines))]
    pub async fn preview_coupon(
        &self,
        code: &str,
        buyer: &Buyer,
        lines: &[CheckoutLine],
    ) -> Result<CouponEvaluation, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one item is required".to_string(),
            ));
        }
        let lines = merge_lines(lines)?;
        let ids: Vec<Uuid> = lines.iter().map(|line| line.variant_id).collect();
        let variants = InventoryLedger::load_variants(self.db.as_ref(), &ids, false).await?;
        if let Some(missing) = ids.iter().find(|id| !variants.contains_key(id)) {
            return Err(ServiceError::NotFound(format!(
                "Product variant {} not found",
                missing
            )));
        }

        let current: Vec<CheckoutLine> = lines
            .iter()
            .map(|line| CheckoutLine {
                unit_price: variants[&line.variant_id].price,
                ..*line
            })
            .collect();

        let Some(code) = normalized_code(Some(code)) else {
            return Err(ServiceError::ValidationError(
                "coupon code is required".to_string(),
            ));
        };
        let (_, evaluation) = CouponEngine::evaluate_code(
            self.db.as_ref(),
            code,
            &buyer.coupon_holder(),
            coupon_lines(&current, &variants),
            false,
            Utc::now(),
        )
        .await?;
        Ok(evaluation)
    }
}

fn validate_command(command: &PlaceOrderCommand) -> Result<(), ServiceError> {
    if command.lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "at least one item is required".to_string(),
        ));
    }
    if command.shipping_fee < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "shipping fee cannot be negative".to_string(),
        ));
    }
    if command.shipping_address.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "shipping address is required".to_string(),
        ));
    }
    Ok(())
}

fn normalized_code(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|code| !code.is_empty())
}

/// Collapses repeated variants into one line, keeping first-seen order. The
/// repeated lines must agree on the unit price.
fn merge_lines(lines: &[CheckoutLine]) -> Result<Vec<CheckoutLine>, ServiceError> {
    let mut merged: Vec<CheckoutLine> = Vec::with_capacity(lines.len());
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for line in lines {
        if line.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for variant {} must be positive",
                line.variant_id
            )));
        }
        match index.get(&line.variant_id) {
            Some(&at) => {
                let existing = &mut merged[at];
                if existing.unit_price != line.unit_price {
                    return Err(ServiceError::ValidationError(format!(
                        "variant {} appears with different prices",
                        line.variant_id
                    )));
                }
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(
                    || ServiceError::ValidationError("quantity out of range".to_string()),
                )?;
            }
            None => {
                index.insert(line.variant_id, merged.len());
                merged.push(*line);
            }
        }
    }
    Ok(merged)
}

/// Freezes each line at its unit price after checking it against the
/// variant's current price.
fn price_lines(
    lines: &[CheckoutLine],
    variants: &HashMap<Uuid, VariantSnapshot>,
) -> Result<Vec<PricedLine>, ServiceError> {
    lines
        .iter()
        .map(|line| {
            let variant = variants.get(&line.variant_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product variant {} not found", line.variant_id))
            })?;
            if variant.price != line.unit_price {
                return Err(ServiceError::PriceChanged(format!(
                    "price of {} is now {}",
                    variant.sku, variant.price
                )));
            }
            Ok(PricedLine {
                variant_id: line.variant_id,
                sku: variant.sku.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
        })
        .collect()
}

fn coupon_lines(
    lines: &[CheckoutLine],
    variants: &HashMap<Uuid, VariantSnapshot>,
) -> Vec<CouponLine> {
    lines
        .iter()
        .filter_map(|line| {
            let variant = variants.get(&line.variant_id)?;
            Some(CouponLine {
                product_id: variant.product_id,
                category_id: variant.category_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
        })
        .collect()
}

/// Removes the purchased variants from the buyer's cart. A cart that is
/// missing or belongs to someone else is left alone.
async fn clear_purchased_cart_lines(
    txn: &DatabaseTransaction,
    cart_id: Uuid,
    buyer: &Buyer,
    purchased: &[StockRequest],
) -> Result<(), ServiceError> {
    let Some(cart) = cart::Entity::find_by_id(cart_id).one(txn).await? else {
        warn!(%cart_id, "checkout referenced an unknown cart");
        return Ok(());
    };
    let owned = match buyer {
        Buyer::Registered { user_id } => cart.user_id == Some(*user_id),
        Buyer::Guest(_) => cart.user_id.is_none(),
    };
    if !owned {
        warn!(%cart_id, "checkout referenced a cart owned by another buyer");
        return Ok(());
    }

    let removed = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::VariantId.is_in(purchased.iter().map(|r| r.variant_id)))
        .exec(txn)
        .await?;
    debug!(%cart_id, removed = removed.rows_affected, "cart lines cleared");
    Ok(())
}
