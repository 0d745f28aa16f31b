//! Unit conversion resolver.
//!
//! Converts a quantity expressed in an order/line unit into another unit (in
//! practice the product's base unit) using a table of direct factors. There is
//! no multi-hop inference: `EA -> BOX -> PALLET` must be registered as
//! `EA -> PALLET` to be usable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{ConversionFactor, DomainError, DomainResult, Quantity, UnitId};

/// One registered `from -> to` factor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: UnitId,
    pub to: UnitId,
    pub factor: ConversionFactor,
}

/// Table of direct conversion factors, unique per `(from, to)` pair.
#[derive(Debug, Clone, Default)]
pub struct ConversionTable {
    factors: HashMap<(UnitId, UnitId), ConversionFactor>,
}

impl ConversionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factor. Re-registering the same factor is a no-op; a different
    /// factor for an existing pair is a conflict.
    pub fn register(&mut self, conversion: UnitConversion) -> DomainResult<()> {
        if conversion.from == conversion.to {
            return Err(DomainError::validation(
                "conversion between a unit and itself is implicit",
            ));
        }
        match self.factors.get(&(conversion.from, conversion.to)) {
            Some(existing) if *existing == conversion.factor => Ok(()),
            Some(existing) => Err(DomainError::conflict(format!(
                "conversion {} -> {} already registered with factor {existing}",
                conversion.from, conversion.to
            ))),
            None => {
                self.factors
                    .insert((conversion.from, conversion.to), conversion.factor);
                Ok(())
            }
        }
    }

    /// Factor for a pair; identity pairs are always `1`.
    pub fn factor(&self, from: UnitId, to: UnitId) -> DomainResult<ConversionFactor> {
        if from == to {
            return Ok(ConversionFactor::ONE);
        }
        self.factors
            .get(&(from, to))
            .copied()
            .ok_or(DomainError::ConversionNotFound { from, to })
    }

    /// `qty` in `from` units expressed in `to` units.
    pub fn convert(&self, qty: Quantity, from: UnitId, to: UnitId) -> DomainResult<Quantity> {
        if from == to {
            return Ok(qty);
        }
        qty.scale_by(self.factor(from, to)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = UnitConversion> + '_ {
        self.factors
            .iter()
            .map(|(&(from, to), &factor)| UnitConversion { from, to, factor })
    }
}
