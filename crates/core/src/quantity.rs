//! Fixed-point quantities and unit conversion factors.
//!
//! Quantities carry three fractional digits and factors six, matching the
//! `numeric(18,3)` / `numeric(18,6)` columns of the persisted layout. Every
//! arithmetic result is re-rounded so repeated conversions do not drift.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Fractional digits kept for quantities.
pub const QUANTITY_SCALE: u32 = 3;

/// Fractional digits kept for conversion factors.
pub const FACTOR_SCALE: u32 = 6;

fn round(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Signed stock quantity in some unit of measure.
///
/// Signed on purpose: ledger deltas are quantities too. Non-negativity is an
/// invariant of balances and reservations, checked where it applies.
///
/// Deserialization goes through [`Quantity::new`], so wire values are rounded
/// exactly like constructed ones. The operators saturate at the `Decimal`
/// range; use [`Quantity::checked_add`] where overflow must be reported.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(round(value, QUANTITY_SCALE))
    }

    /// Whole units, e.g. `Quantity::units(100)`.
    pub fn units(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    /// Build from a scaled integer, e.g. `Quantity::from_scaled(12_500, 3)` is 12.5.
    pub fn from_scaled(mantissa: i64, scale: u32) -> Self {
        Self::new(Decimal::new(mantissa, scale))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// `max(self, 0)`.
    pub fn clamp_non_negative(self) -> Self {
        if self.is_negative() { Self::ZERO } else { self }
    }

    pub fn checked_add(self, rhs: Quantity) -> DomainResult<Quantity> {
        self.0
            .checked_add(rhs.0)
            .map(Self::new)
            .ok_or_else(|| DomainError::validation("quantity overflow"))
    }

    /// Multiply by a conversion factor and re-round to quantity scale.
    pub fn scale_by(self, factor: ConversionFactor) -> DomainResult<Quantity> {
        self.0
            .checked_mul(factor.0)
            .map(Self::new)
            .ok_or_else(|| DomainError::validation("quantity overflow during conversion"))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity::new(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        *self = *self + rhs;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity::new(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        *self = *self - rhs;
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity(-self.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Quantity {
        iter.copied().sum()
    }
}

/// Multiplier that converts a quantity from one unit into another.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct ConversionFactor(Decimal);

impl ConversionFactor {
    pub const ONE: ConversionFactor = ConversionFactor(Decimal::ONE);

    /// Factors must be strictly positive.
    pub fn new(value: Decimal) -> DomainResult<Self> {
        let value = round(value, FACTOR_SCALE);
        if value <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "conversion factor must be positive (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for ConversionFactor {
    type Error = DomainError;

    fn try_from(value: Decimal) -> DomainResult<Self> {
        Self::new(value)
    }
}

impl From<ConversionFactor> for Decimal {
    fn from(value: ConversionFactor) -> Self {
        value.0
    }
}

impl fmt::Display for ConversionFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}
