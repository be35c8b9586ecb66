//! Property-based tests for the pricing, signing and state rules.
//!
//! These run without a database and cover the arithmetic and state-machine
//! invariants across a wide range of inputs.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rust_decimal::Decimal;
use solestore_api::{
    entities::{commerce::DiscountType, OrderStatus},
    services::{
        coupons::CouponEngine,
        order_builder::OrderTotals,
        payment_gateway::{amount_in_minor_units, sign, verify},
    },
};

// Whole-unit prices as the shop sells them
fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..50_000_000).prop_map(Decimal::from)
}

fn discount_type_strategy() -> impl Strategy<Value = (DiscountType, Decimal)> {
    prop_oneof![
        (-50i64..=250).prop_map(|pct| (DiscountType::Percentage, Decimal::from(pct))),
        (-1_000_000i64..10_000_000)
            .prop_map(|amount| (DiscountType::FixedAmount, Decimal::from(amount))),
    ]
}

fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::PendingPayment),
        Just(OrderStatus::Pending),
        Just(OrderStatus::Confirmed),
        Just(OrderStatus::Shipped),
        Just(OrderStatus::Delivered),
        Just(OrderStatus::Cancelled),
    ]
}

fn callback_fields_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    (1i64..1_000_000_000, "[0-9]{2}", "[A-Z]{3,6}").prop_map(|(amount, code, bank)| {
        let mut fields = BTreeMap::new();
        fields.insert("vnp_Amount".to_string(), (amount * 100).to_string());
        fields.insert("vnp_BankCode".to_string(), bank);
        fields.insert("vnp_ResponseCode".to_string(), code);
        fields.insert(
            "vnp_TxnRef".to_string(),
            "USER_6f1c1f0e-5d7b-4b8e-9c4a-2f0a8f9f6b11".to_string(),
        );
        fields
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn discount_never_exceeds_eligible_subtotal(
        eligible in money_strategy(),
        (discount_type, value) in discount_type_strategy(),
    ) {
        let discount = CouponEngine::discount_for(discount_type, value, eligible);
        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= eligible, "discount {} over eligible {}", discount, eligible);
        prop_assert_eq!(discount.fract(), Decimal::ZERO);
    }

    #[test]
    fn totals_add_up_and_never_go_negative(
        subtotal in money_strategy(),
        shipping in 0i64..200_000,
        discount in money_strategy(),
    ) {
        let shipping = Decimal::from(shipping);
        let totals = OrderTotals::compute(subtotal, shipping, discount);

        prop_assert!(totals.total >= Decimal::ZERO);
        if discount <= subtotal + shipping {
            prop_assert_eq!(totals.total, subtotal + shipping - discount);
        } else {
            prop_assert_eq!(totals.total, Decimal::ZERO);
        }
    }

    #[test]
    fn coupon_discount_keeps_total_at_least_shipping(
        subtotal in money_strategy(),
        shipping in 0i64..200_000,
        (discount_type, value) in discount_type_strategy(),
    ) {
        let shipping = Decimal::from(shipping);
        let discount = CouponEngine::discount_for(discount_type, value, subtotal);
        let totals = OrderTotals::compute(subtotal, shipping, discount);
        prop_assert!(totals.total >= shipping);
        prop_assert_eq!(totals.total, subtotal + shipping - discount);
    }

    #[test]
    fn terminal_states_have_no_exits(from in status_strategy(), to in status_strategy()) {
        if matches!(from, OrderStatus::Delivered | OrderStatus::Cancelled) {
            prop_assert!(!from.can_transition_to(to));
        }
        prop_assert!(!from.can_transition_to(from));
    }

    #[test]
    fn any_field_change_breaks_the_signature(
        fields in callback_fields_strategy(),
        key_index in 0usize..4,
        suffix in "[0-9a-z]{1,4}",
    ) {
        let secret = "property-test-secret";
        let signature = sign(secret, &fields).unwrap();
        prop_assert!(verify(secret, &fields, &signature));
        prop_assert!(verify(secret, &fields, &signature.to_uppercase()));

        let mut tampered = fields.clone();
        let key = tampered.keys().nth(key_index).cloned().unwrap();
        tampered.entry(key).and_modify(|value| value.push_str(&suffix));
        prop_assert!(!verify(secret, &tampered, &signature));
        prop_assert!(!verify("another-secret", &fields, &signature));
    }

    #[test]
    fn minor_units_are_one_hundred_per_unit(amount in 0i64..1_000_000_000) {
        prop_assert_eq!(amount_in_minor_units(Decimal::from(amount)), Some(amount * 100));
    }
}
