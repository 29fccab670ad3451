//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  The authority recomputes vNF from the item values. One stray          │
//! │  centavo in the totals is rejection 610 ("Total da NF difere do         │
//! │  somatório dos valores").                                               │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Centavos                                         │
//! │    Every value is an i64 count of centavos. Decimal strings for the     │
//! │    XML are produced by integer formatting, never by floats.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use nfe_core::money::Money;
//!
//! let price = Money::from_cents(1099); // R$ 10,99
//! let total = price * 2 + Money::from_cents(500);
//! assert_eq!(total.to_decimal_string(), "26.98");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::{Quantity, TaxRate};

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in centavos.
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative intermediate values (discount math)
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Derives**: Full serde support for JSON serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from centavos.
    ///
    /// ## Example
    /// ```rust
    /// use nfe_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from reais and centavos.
    ///
    /// For negative amounts, only the major unit should be negative.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole reais portion.
    #[inline]
    pub const fn reais(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the centavos portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
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

    /// Largest amount any monetary field of a document may carry:
    /// R$ 9.999.999.999.999,99, the 13-integer-digit limit of the layout.
    pub const MAX_AMOUNT: Money = Money(999_999_999_999_999);

    /// Whether the value fits the layout limit (`0..=MAX_AMOUNT`).
    #[inline]
    pub const fn is_within_layout(&self) -> bool {
        self.0 >= 0 && self.0 <= Self::MAX_AMOUNT.0
    }

    /// Addition that reports overflow instead of wrapping.
    #[inline]
    pub const fn checked_add(self, other: Money) -> Option<Money> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Subtraction that reports overflow instead of wrapping.
    #[inline]
    pub const fn checked_sub(self, other: Money) -> Option<Money> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Sums an iterator, `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(values: I) -> Option<Money> {
        values
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }

    /// Calculates tax for this base at the given rate.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`, rounding half up to
    /// the centavo. This is the only rounding step in the tax path.
    /// `None` when the result does not fit an i64.
    ///
    /// ## Example
    /// ```rust
    /// use nfe_core::money::Money;
    /// use nfe_core::types::TaxRate;
    ///
    /// let base = Money::from_cents(1000);  // R$ 10,00
    /// let rate = TaxRate::from_bps(1800);  // 18% ICMS
    /// assert_eq!(base.calculate_tax(rate).unwrap().cents(), 180);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Option<Money> {
        let tax_cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        i64::try_from(tax_cents).ok().map(Money::from_cents)
    }

    /// Multiplies a unit price by a fractional quantity.
    ///
    /// Quantities are thousandths, so `1.500 kg` is `Quantity(1500)`. The
    /// product is rounded half up to the centavo. `None` when the product
    /// does not fit an i64.
    ///
    /// ## Example
    /// ```rust
    /// use nfe_core::money::Money;
    /// use nfe_core::types::Quantity;
    ///
    /// let unit_price = Money::from_cents(299);
    /// let line_total = unit_price.multiply_quantity(Quantity::from_units(3)).unwrap();
    /// assert_eq!(line_total.cents(), 897);
    ///
    /// let by_weight = Money::from_cents(1999)
    ///     .multiply_quantity(Quantity::from_thousandths(1250))
    ///     .unwrap();
    /// assert_eq!(by_weight.cents(), 2499); // 24.9875 → 24.99
    ///
    /// assert!(Money::from_cents(i64::MAX).multiply_quantity(Quantity::from_units(3)).is_none());
    /// ```
    pub fn multiply_quantity(&self, qty: Quantity) -> Option<Money> {
        let product = (self.0 as i128).checked_mul(qty.thousandths() as i128)?;
        let rounded = product.checked_add(500)? / 1000;
        i64::try_from(rounded).ok().map(Money::from_cents)
    }

    /// Formats the value with a dot and two decimals, as the XML layout
    /// expects (`1234.50`).
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.reais().abs(), self.cents_part())
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the value the way it is printed on the DANFE.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}R$ {},{:02}", sign, self.reais().abs(), self.cents_part())
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
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
