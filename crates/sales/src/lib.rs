//! Sales domain module.
//!
//! Sales order headers and lines, shipments, and the derivation of the header's
//! ship status from shipped versus ordered quantities. Pure domain logic.

pub mod order;
pub mod shipment;

pub use order::{
    SalesOrder, SalesOrderLine, SalesOrderStatus, derive_ship_status, qty_to_reserve,
};
pub use shipment::{Shipment, ShipmentItem, total_shipped};
