//! # Cart Pricing Engine
//!
//! Pure, stateless computation of subtotal, discount, tax and grand total
//! for a cart snapshot, plus the equivalent recomputation for persisted
//! order lines.
//!
//! ## Pricing Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Per line                                                               │
//! │    subtotal       = unit_price × quantity                               │
//! │    discount_total = min(subtotal, subtotal × pct + amount)              │
//! │    total          = max(0, subtotal − discount_total)                   │
//! │    tax            = total × category rate                               │
//! │                                                                         │
//! │  Cart                                                                   │
//! │    subtotal        = Σ line.subtotal                                    │
//! │    base            = max(0, subtotal − Σ line.discount_total)           │
//! │    cart_discount   = base × cart pct + cart amount                      │
//! │    total_discount  = min(subtotal, Σ line.discount + cart_discount)     │
//! │    total           = max(0, subtotal − total_discount)                  │
//! │    tax             = Σ line.tax × (1 − cart_discount / subtotal)        │
//! │    grand_total     = total + tax                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the cart-level share of the discount pro-rates tax: line totals
//! already carry their own discounts. The pro-ration ratio is clamped to
//! [0, 1] so a fixed cart discount larger than the subtotal cannot produce
//! negative tax.
//!
//! There are no error conditions. Negative prices, quantities and amounts
//! are treated as zero.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cart::{Cart, CartLineItem};
use crate::money::Money;
use crate::types::TaxRate;

/// Pricing of one cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LinePricing {
    pub product_id: i64,
    pub subtotal: Money,
    pub discount_total: Money,
    pub total: Money,
    pub tax: Money,
}

/// Pricing of a whole cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CartPricing {
    pub lines: Vec<LinePricing>,
    pub subtotal: Money,
    /// Σ line discounts.
    pub item_discount: Money,
    /// Cart-level discount as computed (before capping at the subtotal).
    pub cart_discount: Money,
    /// Line + cart discounts, capped at the subtotal.
    pub total_discount: Money,
    /// Pre-tax total.
    pub total: Money,
    /// Σ line tax before cart-level pro-ration.
    pub tax_subtotal: Money,
    pub tax: Money,
    pub grand_total: Money,
}

/// Totals of a persisted order after its lines changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

/// Prices a single line.
pub fn price_line(item: &CartLineItem) -> LinePricing {
    let quantity = item.quantity.max(0);
    let subtotal = (item.unit_price().non_negative() * quantity).non_negative();

    let requested = subtotal.percentage(item.discount_percentage)
        + item.discount_amount().non_negative();
    let discount_total = requested.min(subtotal);
    let total = (subtotal - discount_total).non_negative();

    LinePricing {
        product_id: item.product_id,
        subtotal,
        discount_total,
        total,
        tax: total.calculate_tax(item.tax_rate),
    }
}

/// Prices a cart snapshot.
///
/// ```rust
/// use meridian_core::cart::Cart;
/// use meridian_core::money::Money;
/// use meridian_core::pricing::price_cart;
/// use meridian_core::types::{Percentage, Product};
///
/// let vat = Percentage::from_bps(1400);
/// let mut cart = Cart::new();
/// cart.add_item(&Product::new(1, "X", 1000, vat), 2).unwrap();
/// cart.add_item(&Product::new(2, "Y", 500, vat), 1).unwrap();
/// cart.set_item_discount(1, Percentage::from_bps(2000), Money::zero()).unwrap();
///
/// let p = price_cart(&cart);
/// assert_eq!(p.subtotal.cents(), 2500);
/// assert_eq!(p.total_discount.cents(), 400);
/// assert_eq!(p.total.cents(), 2100);
/// assert_eq!(p.tax.cents(), 294);
/// assert_eq!(p.grand_total.cents(), 2394);
/// ```
pub fn price_cart(cart: &Cart) -> CartPricing {
    let lines: Vec<LinePricing> = cart.items.iter().map(price_line).collect();

    let subtotal: Money = lines.iter().map(|l| l.subtotal).sum();
    let item_discount: Money = lines.iter().map(|l| l.discount_total).sum();

    let base = (subtotal - item_discount).non_negative();
    let cart_discount =
        base.percentage(cart.discount_percentage) + cart.discount_amount().non_negative();

    let total_discount = (item_discount + cart_discount).min(subtotal);
    let total = (subtotal - total_discount).non_negative();

    let tax_subtotal: Money = lines.iter().map(|l| l.tax).sum();
    let tax = if cart_discount.is_positive() && subtotal.is_positive() {
        let remaining = (subtotal - cart_discount).non_negative();
        tax_subtotal.scale(remaining, subtotal)
    } else {
        tax_subtotal
    };

    CartPricing {
        lines,
        subtotal,
        item_discount,
        cart_discount,
        total_discount,
        total,
        tax_subtotal,
        tax,
        grand_total: total + tax,
    }
}

/// Grand total of a cart (what the customer pays).
pub fn grand_total(cart: &Cart) -> Money {
    price_cart(cart).grand_total
}

/// Recomputes persisted order totals from `(line_total, tax_rate)` pairs.
///
/// The existing order discount is kept but capped at the new subtotal so
/// `0 ≤ discount ≤ subtotal` survives lines being removed.
pub fn order_totals<I>(lines: I, discount: Money) -> OrderTotals
where
    I: IntoIterator<Item = (Money, TaxRate)>,
{
    let mut subtotal = Money::zero();
    let mut tax = Money::zero();
    for (line_total, rate) in lines {
        let line_total = line_total.non_negative();
        subtotal += line_total;
        tax += line_total.calculate_tax(rate);
    }

    let discount = discount.non_negative().min(subtotal);
    OrderTotals {
        subtotal,
        discount,
        tax,
        total: subtotal - discount + tax,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Percentage, Product};
    use crate::MAX_ITEM_QUANTITY;

    fn vat14() -> Percentage {
        Percentage::from_bps(1400)
    }

    fn scenario_cart() -> Cart {
        let mut cart = Cart::new();
        cart.add_item(&Product::new(1, "Product X", 1000, vat14()), 2)
            .unwrap();
        cart.add_item(&Product::new(2, "Product Y", 500, vat14()), 1)
            .unwrap();
        cart.set_item_discount(1, Percentage::from_bps(2000), Money::zero())
            .unwrap();
        cart
    }

    #[test]
    fn test_line_discount_and_tax() {
        let cart = scenario_cart();
        let x = price_line(&cart.items[0]);
        assert_eq!(x.subtotal.cents(), 2000);
        assert_eq!(x.discount_total.cents(), 400);
        assert_eq!(x.total.cents(), 1600);
        assert_eq!(x.tax.cents(), 224);
    }

    #[test]
    fn test_item_discount_only_scenario() {
        let p = price_cart(&scenario_cart());
        assert_eq!(p.subtotal.cents(), 2500);
        assert_eq!(p.item_discount.cents(), 400);
        assert_eq!(p.cart_discount.cents(), 0);
        assert_eq!(p.total_discount.cents(), 400);
        assert_eq!(p.total.cents(), 2100);
        assert_eq!(p.tax_subtotal.cents(), 294);
        assert_eq!(p.tax.cents(), 294);
        assert_eq!(p.grand_total.cents(), 2394);
    }

    #[test]
    fn test_full_cart_discount_zeroes_total_and_tax() {
        let mut cart = Cart::new();
        cart.add_item(&Product::new(1, "A", 1000, vat14()), 3).unwrap();
        cart.add_item(&Product::new(2, "B", 250, vat14()), 2).unwrap();
        cart.set_cart_discount(Percentage::from_bps(10_000), Money::zero());

        let p = price_cart(&cart);
        assert_eq!(p.total.cents(), 0);
        assert_eq!(p.tax.cents(), 0);
        assert_eq!(p.grand_total.cents(), 0);
    }

    #[test]
    fn test_cart_discount_applies_after_item_discounts() {
        let mut cart = scenario_cart();
        // 10% of (2500 − 400) = 210
        cart.set_cart_discount(Percentage::from_bps(1000), Money::zero());

        let p = price_cart(&cart);
        assert_eq!(p.cart_discount.cents(), 210);
        assert_eq!(p.total_discount.cents(), 610);
        assert_eq!(p.total.cents(), 1890);
        // 294 × (2500 − 210) / 2500 = 269.304 → 269
        assert_eq!(p.tax.cents(), 269);
        assert_eq!(p.grand_total.cents(), 2159);
    }

    #[test]
    fn test_fixed_discounts_never_exceed_subtotal() {
        let mut cart = Cart::new();
        cart.add_item(&Product::new(1, "A", 300, vat14()), 1).unwrap();
        cart.set_item_discount(1, Percentage::zero(), Money::from_cents(1000))
            .unwrap();
        cart.set_cart_discount(Percentage::zero(), Money::from_cents(5000));

        let p = price_cart(&cart);
        assert_eq!(p.lines[0].discount_total.cents(), 300);
        assert_eq!(p.total_discount.cents(), 300);
        assert_eq!(p.total.cents(), 0);
        assert_eq!(p.tax.cents(), 0);
        assert!(!p.grand_total.is_negative());
    }

    #[test]
    fn test_negative_inputs_are_treated_as_zero() {
        // add_item rejects these; a line built by hand still prices to zero
        let mut cart = Cart::new();
        cart.items
            .push(CartLineItem::from_product(&Product::new(1, "Refund?", -500, vat14()), 1));
        let p = price_cart(&cart);
        assert_eq!(p.subtotal, Money::zero());
        assert_eq!(p.grand_total, Money::zero());
    }

    #[test]
    fn test_huge_prices_saturate_instead_of_panicking() {
        let mut cart = Cart::new();
        for id in 1..=3 {
            cart.items.push(CartLineItem::from_product(
                &Product::new(id, "Yacht", i64::MAX / 2, vat14()),
                MAX_ITEM_QUANTITY,
            ));
        }
        cart.set_cart_discount(Percentage::from_bps(1000), Money::from_cents(i64::MAX));

        let p = price_cart(&cart);
        assert_eq!(p.subtotal.cents(), i64::MAX);
        assert!(p.grand_total >= Money::zero());
    }

    #[test]
    fn test_empty_cart() {
        let p = price_cart(&Cart::new());
        assert!(p.lines.is_empty());
        assert_eq!(p.grand_total, Money::zero());
        assert_eq!(grand_total(&Cart::new()), Money::zero());
    }

    #[test]
    fn test_order_totals_keep_invariant() {
        let lines = vec![
            (Money::from_cents(2000), vat14()),
            (Money::from_cents(500), Percentage::zero()),
        ];
        let totals = order_totals(lines, Money::from_cents(300));
        assert_eq!(totals.subtotal.cents(), 2500);
        assert_eq!(totals.tax.cents(), 280);
        assert_eq!(totals.discount.cents(), 300);
        assert_eq!(totals.total.cents(), 2500 - 300 + 280);

        // discount larger than the new subtotal is capped
        let shrunk = order_totals(vec![(Money::from_cents(100), vat14())], Money::from_cents(300));
        assert_eq!(shrunk.discount.cents(), 100);
        assert_eq!(shrunk.total.cents(), 14);
    }
}
