//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004                                      │
//! │                                                                         │
//! │  The order invariant total == subtotal − discount + tax must hold      │
//! │  after every mutation. With integer cents it holds exactly; with       │
//! │  floats it only holds "within tolerance".                              │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents, rounding once per percentage step        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use meridian_core::money::Money;
//! use meridian_core::types::Percentage;
//!
//! let price = Money::from_cents(1000);             // 10.00
//! let line = price * 2;                            // 20.00
//! let off = line.percentage(Percentage::from_bps(2000)); // 20% = 4.00
//! assert_eq!((line - off).cents(), 1600);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::Percentage;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Signed so that intermediate results (e.g. `subtotal - discount` before
/// clamping) can be represented; the pricing rules clamp at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Converts a decimal amount (as typed by a cashier) to cents,
    /// rounding to the nearest cent.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    ///
    /// assert_eq!(Money::from_decimal(23.94).cents(), 2394);
    /// assert_eq!(Money::from_decimal(0.005).cents(), 1);
    /// ```
    pub fn from_decimal(amount: f64) -> Self {
        if !amount.is_finite() {
            return Money::zero();
        }
        Money((amount * 100.0).round() as i64)
    }

    /// Returns the value as a decimal amount (display/report use only).
    #[inline]
    pub fn to_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.saturating_abs())
    }

    /// Clamps negative values to zero.
    #[inline]
    pub const fn non_negative(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            *self
        }
    }

    /// Takes `rate` of this amount, rounding half away from zero.
    ///
    /// ## Implementation
    /// Integer math on the magnitude: `(|amount| * bps + 5000) / 10000`,
    /// then the sign is restored. i128 keeps large amounts from overflowing.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    /// use meridian_core::types::Percentage;
    ///
    /// // 10.00 at 8.25% = 0.825 → 0.83
    /// let tax = Money::from_cents(1000).percentage(Percentage::from_bps(825));
    /// assert_eq!(tax.cents(), 83);
    /// ```
    pub fn percentage(&self, rate: Percentage) -> Money {
        let magnitude = (self.0.unsigned_abs() as i128 * rate.bps() as i128 + 5000) / 10000;
        let signed = if self.0 < 0 { -magnitude } else { magnitude };
        Money::from_wide(signed)
    }

    /// Tax on this amount at the given rate.
    #[inline]
    pub fn calculate_tax(&self, rate: Percentage) -> Money {
        self.percentage(rate)
    }

    /// Scales this amount by `numerator / denominator`, rounding half up.
    ///
    /// Used to pro-rate tax when a cart-level discount removes part of the
    /// taxable base. Returns zero when the denominator is not positive.
    pub fn scale(&self, numerator: Money, denominator: Money) -> Money {
        if denominator.0 <= 0 {
            return Money::zero();
        }
        let num = self.0 as i128 * numerator.0 as i128;
        let den = denominator.0 as i128;
        let rounded = if num >= 0 {
            (num + den / 2) / den
        } else {
            -((-num + den / 2) / den)
        };
        Money::from_wide(rounded)
    }

    /// Multiplies money by a quantity, saturating at the i64 bounds.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }

    /// Checked addition; `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Money> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Checked multiplication by a quantity; `None` on overflow.
    #[inline]
    pub const fn checked_mul(&self, qty: i64) -> Option<Money> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// True when the two amounts differ by at most `tolerance`.
    #[inline]
    pub fn approx_eq(&self, other: Money, tolerance: Money) -> bool {
        self.0.abs_diff(other.0) <= tolerance.0.unsigned_abs()
    }

    fn from_wide(cents: i128) -> Money {
        Money(cents.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly rendering. Localized formatting is the presentation
/// layer's job.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_sub(other.0);
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn test_from_decimal_rounds_to_cent() {
        assert_eq!(Money::from_decimal(10.0).cents(), 1000);
        assert_eq!(Money::from_decimal(2.94).cents(), 294);
        assert_eq!(Money::from_decimal(f64::NAN).cents(), 0);
        assert!((Money::from_cents(2394).to_decimal() - 23.94).abs() < 1e-9);
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_percentage_rounding() {
        // 10.00 at 14% = 1.40
        let tax = Money::from_cents(1000).percentage(Percentage::from_bps(1400));
        assert_eq!(tax.cents(), 140);

        // 0.05 at 10% = 0.005 → 0.01
        let tiny = Money::from_cents(5).percentage(Percentage::from_bps(1000));
        assert_eq!(tiny.cents(), 1);

        // Sign is preserved, magnitude rounded the same way
        let neg = Money::from_cents(-5).percentage(Percentage::from_bps(1000));
        assert_eq!(neg.cents(), -1);
    }

    #[test]
    fn test_scale() {
        // 2.94 × (21.00 − 2.10) / 21.00 = 2.646 → 2.65
        let scaled = Money::from_cents(294).scale(Money::from_cents(1890), Money::from_cents(2100));
        assert_eq!(scaled.cents(), 265);

        assert_eq!(Money::from_cents(294).scale(Money::zero(), Money::from_cents(2100)), Money::zero());
        assert_eq!(Money::from_cents(294).scale(Money::from_cents(1), Money::zero()), Money::zero());
    }

    #[test]
    fn test_non_negative_and_checks() {
        assert_eq!(Money::from_cents(-100).non_negative(), Money::zero());
        assert_eq!(Money::from_cents(100).non_negative().cents(), 100);
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
        assert!(Money::from_cents(2394).approx_eq(Money::from_cents(2395), Money::from_cents(1)));
        assert!(!Money::from_cents(2394).approx_eq(Money::from_cents(2396), Money::from_cents(1)));
    }

    #[test]
    fn test_overflow_saturates_instead_of_panicking() {
        let huge = Money::from_cents(i64::MAX / 2);

        assert_eq!((huge * 3).cents(), i64::MAX);
        assert_eq!((huge + huge + huge).cents(), i64::MAX);
        assert_eq!((Money::from_cents(i64::MIN) - huge).cents(), i64::MIN);
        assert_eq!(huge.multiply_quantity(-3).cents(), i64::MIN);
        assert_eq!(Money::from_cents(i64::MIN).abs().cents(), i64::MAX);

        let total: Money = vec![huge; 4].into_iter().sum();
        assert_eq!(total.cents(), i64::MAX);

        assert_eq!(huge.checked_mul(3), None);
        assert_eq!(huge.checked_add(huge), Some(Money::from_cents(i64::MAX - 1)));
        assert_eq!(huge.checked_mul(2), Some(Money::from_cents(i64::MAX - 1)));

        // Scaling up past the range clamps as well
        assert_eq!(huge.scale(Money::from_cents(3), Money::from_cents(1)).cents(), i64::MAX);
        assert!(Money::from_cents(i64::MIN).approx_eq(Money::from_cents(i64::MIN), Money::zero()));
    }
}
