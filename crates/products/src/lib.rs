//! Products domain module.
//!
//! Product master data and the unit conversion resolver, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;
pub mod uom;

pub use product::Product;
pub use uom::{ConversionTable, UnitConversion};
