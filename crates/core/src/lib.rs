//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the normalized stock bucket key, fixed-point quantities and the
//! shared error taxonomy.

pub mod bucket;
pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;

pub use bucket::BucketKey;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    BinId, LedgerEntryId, LotId, PickItemId, PicklistId, ProductId, PurchaseOrderId,
    PurchaseOrderLineId, ReservationId, SalesOrderId, SalesOrderLineId, ShipmentId,
    ShipmentItemId, UnitId, UserId, WarehouseId,
};
pub use quantity::{ConversionFactor, Quantity};
