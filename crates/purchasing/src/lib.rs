//! Purchasing domain module.
//!
//! Purchase order headers and lines, line receipt, and the derivation of the
//! header's received status from its lines. Pure domain logic: storage, locking
//! and the stock posting that accompanies a receipt live in the infra crate.

pub mod order;

pub use order::{PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus, derive_received_status};
