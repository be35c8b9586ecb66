//! Coupon validation and redemption accounting.
//!
//! [`CouponEngine::validate`] is pure: it sees a coupon, the lines it might
//! discount and what is known about the buyer, and returns a
//! [`CouponEvaluation`]. [`CouponEngine::evaluate_code`] gathers that input
//! from the database. Checkout calls it with `lock = true` inside the
//! placement transaction; the preview endpoint calls it with `lock = false`
//! and never writes.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::commerce::{
    coupon, coupon_category, coupon_product, coupon_usage_log, user_voucher, CouponScope,
    DiscountType,
};
use crate::errors::ServiceError;
use crate::repositories::OrderRef;

/// Why a coupon cannot be applied. The `Display` text is shown to buyers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    #[error("coupon does not exist")]
    NotFound,
    #[error("coupon is no longer active")]
    Inactive,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon has reached its usage limit")]
    UsageLimitReached,
    #[error("no items in this order are eligible for the coupon")]
    NoEligibleItems,
    #[error("order amount {eligible_subtotal} is below the coupon minimum of {minimum}")]
    BelowMinimumPurchase {
        minimum: Decimal,
        eligible_subtotal: Decimal,
    },
    #[error("coupon is only available to signed-in customers")]
    RequiresAccount,
    #[error("coupon is not in your voucher wallet or was already used")]
    VoucherUnavailable,
    #[error("you have already used this coupon the maximum number of times")]
    PerUserLimitReached,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "coupon_not_found",
            Self::Inactive => "coupon_inactive",
            Self::Expired => "coupon_expired",
            Self::UsageLimitReached => "coupon_usage_limit_reached",
            Self::NoEligibleItems => "coupon_no_eligible_items",
            Self::BelowMinimumPurchase { .. } => "coupon_below_minimum_purchase",
            Self::RequiresAccount => "coupon_requires_account",
            Self::VoucherUnavailable => "coupon_voucher_unavailable",
            Self::PerUserLimitReached => "coupon_per_user_limit_reached",
        }
    }
}

/// Who is redeeming. Guests are identified by their (lower-cased) email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponHolder {
    User(Uuid),
    Guest(String),
}

/// An order line with the catalog data scope checks need.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponLine {
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl CouponLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A coupon row together with its scope lists.
#[derive(Debug, Clone)]
pub struct LoadedCoupon {
    pub coupon: coupon::Model,
    pub category_ids: HashSet<Uuid>,
    pub product_ids: HashSet<Uuid>,
}

impl LoadedCoupon {
    /// Coupon with `scope = all`; handy where no scope lists apply.
    pub fn unscoped(coupon: coupon::Model) -> Self {
        Self {
            coupon,
            category_ids: HashSet::new(),
            product_ids: HashSet::new(),
        }
    }

    fn covers(&self, line: &CouponLine) -> bool {
        match self.coupon.scope {
            CouponScope::All => true,
            CouponScope::Categories => self.category_ids.contains(&line.category_id),
            CouponScope::Products => self.product_ids.contains(&line.product_id),
        }
    }
}

/// Everything about the buyer and the order the engine needs.
#[derive(Debug, Clone)]
pub struct CouponContext {
    pub holder: CouponHolder,
    pub lines: Vec<CouponLine>,
    pub has_unused_voucher: bool,
    pub prior_redemptions: u64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponEvaluation {
    pub eligible: bool,
    pub discount: Decimal,
    pub eligible_subtotal: Decimal,
    #[serde(skip)]
    pub reason: Option<CouponRejection>,
}

impl CouponEvaluation {
    fn rejected(reason: CouponRejection) -> Self {
        Self {
            eligible: false,
            discount: Decimal::ZERO,
            eligible_subtotal: Decimal::ZERO,
            reason: Some(reason),
        }
    }

    /// The discount, or the rejection as an error.
    pub fn into_discount(self) -> Result<Decimal, CouponRejection> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(self.discount),
        }
    }
}

pub struct CouponEngine;

impl CouponEngine {
    /// Checks run in a fixed order and the first failure wins.
    pub fn validate(coupon: &LoadedCoupon, ctx: &CouponContext) -> CouponEvaluation {
        let rules = &coupon.coupon;

        if !rules.is_active {
            return CouponEvaluation::rejected(CouponRejection::Inactive);
        }
        if rules.expiry_date <= ctx.now {
            return CouponEvaluation::rejected(CouponRejection::Expired);
        }
        if rules.max_uses > 0 && rules.used_count >= rules.max_uses {
            return CouponEvaluation::rejected(CouponRejection::UsageLimitReached);
        }

        let eligible_lines: Vec<&CouponLine> =
            ctx.lines.iter().filter(|line| coupon.covers(line)).collect();
        if eligible_lines.is_empty() {
            return CouponEvaluation::rejected(CouponRejection::NoEligibleItems);
        }
        let eligible_subtotal: Decimal = eligible_lines.iter().map(|l| l.line_total()).sum();

        if eligible_subtotal < rules.min_purchase_amount {
            return CouponEvaluation::rejected(CouponRejection::BelowMinimumPurchase {
                minimum: rules.min_purchase_amount,
                eligible_subtotal,
            });
        }

        if !rules.is_public {
            match ctx.holder {
                CouponHolder::Guest(_) => {
                    return CouponEvaluation::rejected(CouponRejection::RequiresAccount)
                }
                CouponHolder::User(_) if !ctx.has_unused_voucher => {
                    return CouponEvaluation::rejected(CouponRejection::VoucherUnavailable)
                }
                CouponHolder::User(_) => {}
            }
        } else if rules.uses_per_user > 0 && ctx.prior_redemptions >= rules.uses_per_user as u64 {
            return CouponEvaluation::rejected(CouponRejection::PerUserLimitReached);
        }

        CouponEvaluation {
            eligible: true,
            discount: Self::discount_for(rules.discount_type, rules.discount_value, eligible_subtotal),
            eligible_subtotal,
            reason: None,
        }
    }

    /// Percentages round half away from zero to whole currency units. The
    /// result always lies in `0..=eligible_subtotal`, whatever value the
    /// coupon row carries.
    pub fn discount_for(
        discount_type: DiscountType,
        value: Decimal,
        eligible_subtotal: Decimal,
    ) -> Decimal {
        let value = value.max(Decimal::ZERO);
        let raw = match discount_type {
            DiscountType::Percentage => (eligible_subtotal * value / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            DiscountType::FixedAmount => value,
        };
        raw.min(eligible_subtotal).max(Decimal::ZERO)
    }

    /// Loads the coupon named by `code` and everything needed to judge it.
    ///
    /// With `lock` the coupon row is read `FOR UPDATE`, so the caller must be
    /// inside a transaction. Returns the coupon (when it exists) with the verdict.
    #[instrument(skip(conn, holder, lines))]
    pub async fn evaluate_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        holder: &CouponHolder,
        lines: Vec<CouponLine>,
        lock: bool,
        now: DateTime<Utc>,
    ) -> Result<(Option<coupon::Model>, CouponEvaluation), DbErr> {
        let mut query = coupon::Entity::find().filter(coupon::Column::Code.eq(code.trim()));
        if lock {
            query = query.lock_exclusive();
        }
        let Some(model) = query.one(conn).await? else {
            return Ok((None, CouponEvaluation::rejected(CouponRejection::NotFound)));
        };

        let loaded = Self::load_scope(conn, model).await?;
        let coupon_id = loaded.coupon.id;

        let has_unused_voucher = match holder {
            CouponHolder::User(user_id) if !loaded.coupon.is_public => {
                user_voucher::Entity::find()
                    .filter(user_voucher::Column::UserId.eq(*user_id))
                    .filter(user_voucher::Column::CouponId.eq(coupon_id))
                    .filter(user_voucher::Column::IsUsed.eq(false))
                    .count(conn)
                    .await?
                    > 0
            }
            _ => false,
        };

        let prior_redemptions = if loaded.coupon.is_public && loaded.coupon.uses_per_user > 0 {
            Self::redemptions_by(conn, coupon_id, holder).await?
        } else {
            0
        };

        let ctx = CouponContext {
            holder: holder.clone(),
            lines,
            has_unused_voucher,
            prior_redemptions,
            now,
        };
        let evaluation = Self::validate(&loaded, &ctx);
        debug!(eligible = evaluation.eligible, discount = %evaluation.discount, "coupon evaluated");

        Ok((Some(loaded.coupon), evaluation))
    }

    async fn load_scope<C: ConnectionTrait>(
        conn: &C,
        coupon: coupon::Model,
    ) -> Result<LoadedCoupon, DbErr> {
        let mut loaded = LoadedCoupon::unscoped(coupon);
        match loaded.coupon.scope {
            CouponScope::All => {}
            CouponScope::Categories => {
                loaded.category_ids = coupon_category::Entity::find()
                    .filter(coupon_category::Column::CouponId.eq(loaded.coupon.id))
                    .all(conn)
                    .await?
                    .into_iter()
                    .map(|row| row.category_id)
                    .collect();
            }
            CouponScope::Products => {
                loaded.product_ids = coupon_product::Entity::find()
                    .filter(coupon_product::Column::CouponId.eq(loaded.coupon.id))
                    .all(conn)
                    .await?
                    .into_iter()
                    .map(|row| row.product_id)
                    .collect();
            }
        }
        Ok(loaded)
    }

    async fn redemptions_by<C: ConnectionTrait>(
        conn: &C,
        coupon_id: Uuid,
        holder: &CouponHolder,
    ) -> Result<u64, DbErr> {
        let query = coupon_usage_log::Entity::find()
            .filter(coupon_usage_log::Column::CouponId.eq(coupon_id));
        let query = match holder {
            CouponHolder::User(user_id) => {
                query.filter(coupon_usage_log::Column::UserId.eq(*user_id))
            }
            CouponHolder::Guest(email) => {
                query.filter(coupon_usage_log::Column::GuestEmail.eq(email.as_str()))
            }
        };
        query.count(conn).await
    }

    /// Books a redemption: usage log row, `used_count + 1` guarded by the cap,
    /// and for registered buyers of private coupons one wallet voucher.
    #[instrument(skip(conn, coupon, holder, order), fields(coupon_id = %coupon.id, order = %order))]
    pub async fn record_redemption<C: ConnectionTrait>(
        conn: &C,
        coupon: &coupon::Model,
        holder: &CouponHolder,
        order: &OrderRef,
        discount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let (order_id, guest_order_id) = match order.owner {
            crate::repositories::OrderOwner::User => (Some(order.id), None),
            crate::repositories::OrderOwner::Guest => (None, Some(order.id)),
        };
        let (user_id, guest_email) = match holder {
            CouponHolder::User(id) => (Some(*id), None),
            CouponHolder::Guest(email) => (None, Some(email.clone())),
        };

        coupon_usage_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            order_id: Set(order_id),
            guest_order_id: Set(guest_order_id),
            user_id: Set(user_id),
            guest_email: Set(guest_email),
            discount_amount: Set(discount),
            used_at: Set(now),
        }
        .insert(conn)
        .await?;

        let bumped = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.eq(0))
                    .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::MaxUses))),
            )
            .exec(conn)
            .await?;
        if bumped.rows_affected == 0 {
            return Err(CouponRejection::UsageLimitReached.into());
        }

        if let (CouponHolder::User(user_id), false) = (holder, coupon.is_public) {
            let voucher = user_voucher::Entity::find()
                .filter(user_voucher::Column::UserId.eq(*user_id))
                .filter(user_voucher::Column::CouponId.eq(coupon.id))
                .filter(user_voucher::Column::IsUsed.eq(false))
                .order_by_asc(user_voucher::Column::ClaimedAt)
                .one(conn)
                .await?
                .ok_or(CouponRejection::VoucherUnavailable)?;

            let flipped = user_voucher::Entity::update_many()
                .col_expr(user_voucher::Column::IsUsed, Expr::value(true))
                .col_expr(user_voucher::Column::UsedAt, Expr::value(Some(now)))
                .filter(user_voucher::Column::Id.eq(voucher.id))
                .filter(user_voucher::Column::IsUsed.eq(false))
                .exec(conn)
                .await?;
            if flipped.rows_affected == 0 {
                return Err(CouponRejection::VoucherUnavailable.into());
            }
        }

        metrics::counter!("solestore.coupons.redeemed", 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SALE".into(),
            discount_type,
            discount_value: value,
            min_purchase_amount: Decimal::ZERO,
            expiry_date: now + Duration::days(7),
            max_uses: 0,
            used_count: 0,
            uses_per_user: 0,
            is_public: true,
            scope: CouponScope::All,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn line(product_id: Uuid, category_id: Uuid, qty: i32, price: Decimal) -> CouponLine {
        CouponLine {
            product_id,
            category_id,
            quantity: qty,
            unit_price: price,
        }
    }

    fn ctx(lines: Vec<CouponLine>) -> CouponContext {
        CouponContext {
            holder: CouponHolder::User(Uuid::new_v4()),
            lines,
            has_unused_voucher: false,
            prior_redemptions: 0,
            now: Utc::now(),
        }
    }

    fn single_line(total: Decimal) -> Vec<CouponLine> {
        vec![line(Uuid::new_v4(), Uuid::new_v4(), 1, total)]
    }

    #[test]
    fn twenty_percent_of_five_hundred_thousand() {
        let loaded = LoadedCoupon::unscoped(coupon(DiscountType::Percentage, dec!(20)));
        let eval = CouponEngine::validate(&loaded, &ctx(single_line(dec!(500000))));
        assert!(eval.eligible);
        assert_eq!(eval.discount, dec!(100000));
        assert_eq!(eval.reason, None);
    }

    #[rstest]
    #[case(dec!(12.5), dec!(13))]
    #[case(dec!(12.4), dec!(12))]
    #[case(dec!(0.5), dec!(1))]
    fn percentage_rounds_half_away_from_zero(#[case] subtotal: Decimal, #[case] expected: Decimal) {
        // 100% makes the rounding input equal to the subtotal
        assert_eq!(
            CouponEngine::discount_for(DiscountType::Percentage, dec!(100), subtotal),
            expected
        );
    }

    #[test]
    fn fixed_amount_is_capped_at_eligible_subtotal() {
        assert_eq!(
            CouponEngine::discount_for(DiscountType::FixedAmount, dec!(300000), dec!(200000)),
            dec!(200000)
        );
        assert_eq!(
            CouponEngine::discount_for(DiscountType::FixedAmount, dec!(50000), dec!(200000)),
            dec!(50000)
        );
    }

    #[rstest]
    #[case(DiscountType::Percentage, dec!(150), dec!(100000), dec!(100000))]
    #[case(DiscountType::Percentage, dec!(-10), dec!(100000), dec!(0))]
    #[case(DiscountType::FixedAmount, dec!(-5000), dec!(100000), dec!(0))]
    fn out_of_range_values_stay_within_eligible_subtotal(
        #[case] discount_type: DiscountType,
        #[case] value: Decimal,
        #[case] eligible: Decimal,
        #[case] expected: Decimal,
    ) {
        assert_eq!(CouponEngine::discount_for(discount_type, value, eligible), expected);
    }

    #[test]
    fn expired_coupon_is_rejected() {
        let mut model = coupon(DiscountType::Percentage, dec!(10));
        model.expiry_date = Utc::now() - Duration::hours(1);
        let eval = CouponEngine::validate(&LoadedCoupon::unscoped(model), &ctx(single_line(dec!(100))));
        assert!(!eval.eligible);
        assert_eq!(eval.discount, Decimal::ZERO);
        assert_eq!(eval.reason, Some(CouponRejection::Expired));
    }

    #[test]
    fn inactive_wins_over_expired() {
        let mut model = coupon(DiscountType::Percentage, dec!(10));
        model.is_active = false;
        model.expiry_date = Utc::now() - Duration::hours(1);
        let eval = CouponEngine::validate(&LoadedCoupon::unscoped(model), &ctx(single_line(dec!(100))));
        assert_eq!(eval.reason, Some(CouponRejection::Inactive));
    }

    #[rstest]
    #[case(0, 1000, true)]
    #[case(5, 4, true)]
    #[case(5, 5, false)]
    fn global_cap(#[case] max_uses: i32, #[case] used_count: i32, #[case] allowed: bool) {
        let mut model = coupon(DiscountType::FixedAmount, dec!(10));
        model.max_uses = max_uses;
        model.used_count = used_count;
        let eval = CouponEngine::validate(&LoadedCoupon::unscoped(model), &ctx(single_line(dec!(100))));
        assert_eq!(eval.eligible, allowed);
    }

    #[test]
    fn minimum_purchase_uses_scope_eligible_subtotal() {
        let category = Uuid::new_v4();
        let mut model = coupon(DiscountType::Percentage, dec!(10));
        model.scope = CouponScope::Categories;
        model.min_purchase_amount = dec!(300);
        let loaded = LoadedCoupon {
            coupon: model,
            category_ids: [category].into_iter().collect(),
            product_ids: HashSet::new(),
        };

        let lines = vec![
            line(Uuid::new_v4(), category, 1, dec!(200)),
            line(Uuid::new_v4(), Uuid::new_v4(), 1, dec!(500)),
        ];
        let eval = CouponEngine::validate(&loaded, &ctx(lines));
        assert_eq!(
            eval.reason,
            Some(CouponRejection::BelowMinimumPurchase {
                minimum: dec!(300),
                eligible_subtotal: dec!(200),
            })
        );
    }

    #[test]
    fn product_scope_discounts_only_listed_products() {
        let shoe = Uuid::new_v4();
        let mut model = coupon(DiscountType::Percentage, dec!(50));
        model.scope = CouponScope::Products;
        let loaded = LoadedCoupon {
            coupon: model,
            category_ids: HashSet::new(),
            product_ids: [shoe].into_iter().collect(),
        };

        let lines = vec![
            line(shoe, Uuid::new_v4(), 2, dec!(100)),
            line(Uuid::new_v4(), Uuid::new_v4(), 1, dec!(1000)),
        ];
        let eval = CouponEngine::validate(&loaded, &ctx(lines));
        assert!(eval.eligible);
        assert_eq!(eval.eligible_subtotal, dec!(200));
        assert_eq!(eval.discount, dec!(100));
    }

    #[test]
    fn scoped_coupon_without_matching_lines_fails() {
        let mut model = coupon(DiscountType::Percentage, dec!(50));
        model.scope = CouponScope::Products;
        let loaded = LoadedCoupon {
            coupon: model,
            category_ids: HashSet::new(),
            product_ids: [Uuid::new_v4()].into_iter().collect(),
        };
        let eval = CouponEngine::validate(&loaded, &ctx(single_line(dec!(100))));
        assert_eq!(eval.reason, Some(CouponRejection::NoEligibleItems));
    }

    #[test]
    fn private_coupon_needs_wallet_voucher() {
        let mut model = coupon(DiscountType::FixedAmount, dec!(10));
        model.is_public = false;
        let loaded = LoadedCoupon::unscoped(model);

        let mut context = ctx(single_line(dec!(100)));
        assert_eq!(
            CouponEngine::validate(&loaded, &context).reason,
            Some(CouponRejection::VoucherUnavailable)
        );

        context.has_unused_voucher = true;
        assert!(CouponEngine::validate(&loaded, &context).eligible);

        context.holder = CouponHolder::Guest("guest@example.com".into());
        assert_eq!(
            CouponEngine::validate(&loaded, &context).reason,
            Some(CouponRejection::RequiresAccount)
        );
    }

    #[test]
    fn per_user_cap_counts_prior_redemptions() {
        let mut model = coupon(DiscountType::FixedAmount, dec!(10));
        model.uses_per_user = 2;
        let loaded = LoadedCoupon::unscoped(model);

        let mut context = ctx(single_line(dec!(100)));
        context.prior_redemptions = 1;
        assert!(CouponEngine::validate(&loaded, &context).eligible);

        context.prior_redemptions = 2;
        assert_eq!(
            CouponEngine::validate(&loaded, &context).reason,
            Some(CouponRejection::PerUserLimitReached)
        );
    }

    #[test]
    fn rejection_maps_into_discount_error() {
        let mut model = coupon(DiscountType::Percentage, dec!(10));
        model.max_uses = 1;
        model.used_count = 1;
        let eval = CouponEngine::validate(&LoadedCoupon::unscoped(model), &ctx(single_line(dec!(100))));
        assert_eq!(eval.into_discount(), Err(CouponRejection::UsageLimitReached));
    }
}
