//! GST computation.
//!
//! Pure and infallible: negative money inputs clamp to zero and a missing or
//! negative rate falls back to the configured default, so a malformed cart
//! never fails checkout here.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::entities::GstMode;

/// Rounds to 2 decimal places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GstBreakdown {
    pub mode: GstMode,
    pub rate: Decimal,
    pub taxable_amount: Decimal,
    pub cgst: Decimal,
    pub sgst: Decimal,
    pub igst: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct TaxInput<'a> {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_cost: Decimal,
    pub delivery_state: Option<&'a str>,
    pub seller_state: Option<&'a str>,
    /// Percent; `None` or negative uses the calculator default.
    pub rate: Option<Decimal>,
}

#[derive(Debug, Clone, Copy)]
pub struct TaxCalculator {
    default_rate: Decimal,
}

impl Default for TaxCalculator {
    fn default() -> Self {
        Self {
            default_rate: dec!(18),
        }
    }
}

impl TaxCalculator {
    pub fn new(default_rate: Decimal) -> Self {
        if default_rate < Decimal::ZERO {
            return Self::default();
        }
        Self { default_rate }
    }

    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    pub fn resolve_mode(delivery_state: Option<&str>, seller_state: Option<&str>) -> GstMode {
        if normalize_state(delivery_state) == normalize_state(seller_state) {
            GstMode::CgstSgst
        } else {
            GstMode::Igst
        }
    }

    pub fn effective_rate(&self, rate: Option<Decimal>) -> Decimal {
        rate.filter(|r| *r >= Decimal::ZERO)
            .unwrap_or(self.default_rate)
    }

    pub fn compute(&self, input: &TaxInput<'_>) -> GstBreakdown {
        let mode = Self::resolve_mode(input.delivery_state, input.seller_state);
        self.compute_with_mode(
            input.subtotal,
            input.discount,
            input.shipping_cost,
            mode,
            input.rate,
        )
    }

    /// Same computation with the mode already decided; sub-orders reuse the order's mode.
    pub fn compute_with_mode(
        &self,
        subtotal: Decimal,
        discount: Decimal,
        shipping_cost: Decimal,
        mode: GstMode,
        rate: Option<Decimal>,
    ) -> GstBreakdown {
        let rate = self.effective_rate(rate);
        // Saturating so out-of-range amounts clamp instead of panicking.
        let taxable = clamp(subtotal)
            .saturating_sub(clamp(discount))
            .saturating_add(clamp(shipping_cost));
        let taxable_amount = round_money(clamp(taxable));
        let total = round_money(taxable_amount.saturating_mul(rate) / dec!(100));

        let (cgst, sgst, igst) = match mode {
            GstMode::CgstSgst => {
                let cgst = round_money(total / dec!(2));
                (cgst, total - cgst, Decimal::ZERO)
            }
            GstMode::Igst => (Decimal::ZERO, Decimal::ZERO, total),
        };

        GstBreakdown {
            mode,
            rate,
            taxable_amount,
            cgst,
            sgst,
            igst,
            total,
        }
    }

    pub fn total_with_tax(breakdown: &GstBreakdown) -> Decimal {
        round_money(breakdown.taxable_amount.saturating_add(breakdown.total))
    }
}

fn clamp(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

fn normalize_state(state: Option<&str>) -> Option<String> {
    state
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_state_splits_into_cgst_and_sgst() {
        let calc = TaxCalculator::default();
        let gst = calc.compute(&TaxInput {
            subtotal: dec!(400),
            delivery_state: Some("Karnataka"),
            seller_state: Some("  karnataka "),
            ..Default::default()
        });
        assert_eq!(gst.mode, GstMode::CgstSgst);
        assert_eq!(gst.total, dec!(72));
        assert_eq!(gst.cgst, dec!(36));
        assert_eq!(gst.sgst, dec!(36));
        assert_eq!(gst.igst, Decimal::ZERO);
        assert_eq!(TaxCalculator::total_with_tax(&gst), dec!(472));
    }

    #[test]
    fn different_state_is_igst() {
        let calc = TaxCalculator::default();
        let gst = calc.compute(&TaxInput {
            subtotal: dec!(1000),
            discount: dec!(100),
            shipping_cost: dec!(50),
            delivery_state: Some("Maharashtra"),
            seller_state: Some("Karnataka"),
            rate: Some(dec!(12)),
        });
        assert_eq!(gst.mode, GstMode::Igst);
        assert_eq!(gst.taxable_amount, dec!(950));
        assert_eq!(gst.igst, dec!(114));
        assert_eq!(gst.cgst + gst.sgst, Decimal::ZERO);
    }

    #[test]
    fn odd_cent_split_keeps_the_total() {
        let calc = TaxCalculator::default();
        // 0.09 * 18% = 0.0162 -> 0.02; halves 0.01 + 0.01
        let gst = calc.compute_with_mode(dec!(0.09), dec!(0), dec!(0), GstMode::CgstSgst, None);
        assert_eq!(gst.total, dec!(0.02));
        assert_eq!(gst.cgst + gst.sgst, gst.total);

        // 0.15 * 18% = 0.027 -> 0.03; cgst 0.02 (half-up), sgst 0.01
        let gst = calc.compute_with_mode(dec!(0.15), dec!(0), dec!(0), GstMode::CgstSgst, None);
        assert_eq!(gst.total, dec!(0.03));
        assert_eq!(gst.cgst, dec!(0.02));
        assert_eq!(gst.sgst, dec!(0.01));
    }

    #[test]
    fn rounding_is_half_up() {
        let calc = TaxCalculator::default();
        // 0.25 * 18% = 0.045 -> 0.05
        let gst = calc.compute_with_mode(dec!(0.25), dec!(0), dec!(0), GstMode::Igst, None);
        assert_eq!(gst.total, dec!(0.05));
    }

    #[test]
    fn malformed_inputs_coerce_to_zero() {
        let calc = TaxCalculator::default();
        let gst = calc.compute(&TaxInput {
            subtotal: dec!(-10),
            discount: dec!(-5),
            shipping_cost: dec!(-1),
            rate: Some(dec!(-3)),
            ..Default::default()
        });
        assert_eq!(gst.taxable_amount, Decimal::ZERO);
        assert_eq!(gst.total, Decimal::ZERO);
        assert_eq!(gst.rate, dec!(18));

        let over_discounted =
            calc.compute_with_mode(dec!(100), dec!(150), dec!(0), GstMode::Igst, None);
        assert_eq!(over_discounted.taxable_amount, Decimal::ZERO);
    }

    #[test]
    fn extreme_amounts_saturate() {
        let calc = TaxCalculator::default();
        let gst = calc.compute_with_mode(Decimal::MAX, dec!(0), Decimal::MAX, GstMode::CgstSgst, None);
        assert_eq!(gst.taxable_amount, round_money(Decimal::MAX));
        assert_eq!(gst.cgst + gst.sgst, gst.total);
        assert!(gst.total > Decimal::ZERO);
        assert_eq!(TaxCalculator::total_with_tax(&gst), round_money(Decimal::MAX));
    }

    #[test]
    fn state_comparison_rules() {
        assert_eq!(TaxCalculator::resolve_mode(None, None), GstMode::CgstSgst);
        assert_eq!(TaxCalculator::resolve_mode(Some(" "), None), GstMode::CgstSgst);
        assert_eq!(TaxCalculator::resolve_mode(Some("Goa"), None), GstMode::Igst);
        assert_eq!(
            TaxCalculator::resolve_mode(Some("tamil  nadu"), Some("Tamil Nadu")),
            GstMode::CgstSgst
        );
    }

    fn money() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    proptest! {
        #[test]
        fn components_always_sum_to_total(
            subtotal in money(),
            discount in money(),
            shipping in money(),
            rate in 0u32..=28,
            intra in any::<bool>(),
        ) {
            let calc = TaxCalculator::default();
            let mode = if intra { GstMode::CgstSgst } else { GstMode::Igst };
            let gst = calc.compute_with_mode(subtotal, discount, shipping, mode, Some(Decimal::from(rate)));
            prop_assert_eq!(gst.cgst + gst.sgst + gst.igst, gst.total);
            prop_assert!(gst.total >= Decimal::ZERO);
            prop_assert!(gst.taxable_amount >= Decimal::ZERO);
            prop_assert_eq!(gst.total, round_money(gst.total));
            prop_assert_eq!(TaxCalculator::total_with_tax(&gst), gst.taxable_amount + gst.total);
        }
    }
}
