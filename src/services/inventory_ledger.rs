use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::entities::commerce::{product, product_variant};
use crate::errors::ServiceError;
use crate::events::RestoredLine;
use crate::repositories::{OrderRef, OrderRepository};

/// Result of handing an order's stock back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockRestoration {
    pub restored: Vec<RestoredLine>,
    pub skipped: usize,
}

/// A quantity wanted from one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockRequest {
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// Variant row plus the owning product's category.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSnapshot {
    pub id: Uuid,
    pub sku: String,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub product_id: Uuid,
    pub category_id: Uuid,
}

/// Per-variant stock counters (`product_variants.stock_quantity`).
///
/// `reserve` is the only decrementing path and it refuses to go below zero.
/// `restore` exists for compensation. Both run on the caller's transaction.
pub struct InventoryLedger;

impl InventoryLedger {
    /// Reads variants with their product category. With `lock` the variant
    /// rows are taken `FOR UPDATE` in id order.
    pub async fn load_variants<C: ConnectionTrait>(
        conn: &C,
        variant_ids: &[Uuid],
        lock: bool,
    ) -> Result<HashMap<Uuid, VariantSnapshot>, DbErr> {
        if variant_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = product_variant::Entity::find()
            .filter(product_variant::Column::Id.is_in(variant_ids.iter().copied()))
            .order_by_asc(product_variant::Column::Id);
        if lock {
            query = query.lock_exclusive();
        }
        let variants = query.all(conn).await?;

        let product_ids: Vec<Uuid> = variants.iter().map(|v| v.product_id).collect();
        let categories: HashMap<Uuid, Uuid> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p.category_id))
            .collect();

        Ok(variants
            .into_iter()
            .filter_map(|v| {
                let category_id = *categories.get(&v.product_id)?;
                Some((
                    v.id,
                    VariantSnapshot {
                        id: v.id,
                        sku: v.sku,
                        price: v.price,
                        stock_quantity: v.stock_quantity,
                        product_id: v.product_id,
                        category_id,
                    },
                ))
            })
            .collect())
    }

    /// Locks every requested variant and checks all of them before anything
    /// is mutated. Quantities for a repeated variant are summed.
    #[instrument(skip(conn, requests), fields(lines = requests.len()))]
    pub async fn lock_and_check<C: ConnectionTrait>(
        conn: &C,
        requests: &[StockRequest],
    ) -> Result<HashMap<Uuid, VariantSnapshot>, ServiceError> {
        let mut wanted: BTreeMap<Uuid, i32> = BTreeMap::new();
        for request in requests {
            *wanted.entry(request.variant_id).or_default() += request.quantity;
        }

        let ids: Vec<Uuid> = wanted.keys().copied().collect();
        let variants = Self::load_variants(conn, &ids, true).await?;

        for (variant_id, requested) in &wanted {
            let variant = variants.get(variant_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product variant {} not found", variant_id))
            })?;
            if variant.stock_quantity < *requested {
                metrics::counter!("solestore.inventory.out_of_stock", 1);
                return Err(ServiceError::OutOfStock {
                    sku: variant.sku.clone(),
                    requested: *requested,
                    available: variant.stock_quantity,
                });
            }
        }

        Ok(variants)
    }

    /// Decrements stock only while `stock_quantity >= quantity`.
    pub async fn reserve<C: ConnectionTrait>(
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).sub(quantity),
            )
            .col_expr(
                product_variant::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let current = product_variant::Entity::find_by_id(variant_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product variant {} not found", variant_id))
                })?;
            metrics::counter!("solestore.inventory.out_of_stock", 1);
            return Err(ServiceError::OutOfStock {
                sku: current.sku,
                requested: quantity,
                available: current.stock_quantity,
            });
        }

        Ok(())
    }

    /// Puts stock back. Returns `false` when the variant no longer exists.
    pub async fn restore<C: ConnectionTrait>(
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, DbErr> {
        if quantity <= 0 {
            warn!(%variant_id, quantity, "ignoring non-positive stock restore");
            return Ok(false);
        }

        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).add(quantity),
            )
            .col_expr(
                product_variant::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Returns every line of `order` to stock inside a savepoint of `txn`.
    ///
    /// Lines whose variant is gone or whose quantity is not positive are
    /// skipped. If the savepoint fails it is rolled back and `None` is
    /// returned; the outer transaction stays usable.
    #[instrument(skip(txn), fields(order = %order))]
    pub async fn restore_order(
        txn: &DatabaseTransaction,
        order: &OrderRef,
    ) -> Option<StockRestoration> {
        match Self::try_restore_order(txn, order).await {
            Ok(restoration) => Some(restoration),
            Err(err) => {
                error!(order = %order, error = %err, "stock restoration failed, rolled back");
                metrics::counter!("solestore.inventory.restore_failures", 1);
                None
            }
        }
    }

    async fn try_restore_order(
        txn: &DatabaseTransaction,
        order: &OrderRef,
    ) -> Result<StockRestoration, DbErr> {
        let savepoint = txn.begin().await?;
        match Self::restore_lines(&savepoint, order).await {
            Ok(restoration) => {
                savepoint.commit().await?;
                Ok(restoration)
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(err)
            }
        }
    }

    async fn restore_lines(
        savepoint: &DatabaseTransaction,
        order: &OrderRef,
    ) -> Result<StockRestoration, DbErr> {
        let mut restoration = StockRestoration::default();

        for line in OrderRepository::lines(savepoint, order).await? {
            let Some(variant_id) = line.variant_id.filter(|_| line.quantity > 0) else {
                warn!(order = %order, sku = %line.sku, "skipping unrestorable line");
                restoration.skipped += 1;
                continue;
            };
            if Self::restore(savepoint, variant_id, line.quantity).await? {
                restoration.restored.push(RestoredLine {
                    variant_id,
                    quantity: line.quantity,
                });
            } else {
                warn!(order = %order, %variant_id, "variant vanished, skipping restore");
                restoration.skipped += 1;
            }
        }

        Ok(restoration)
    }
}
