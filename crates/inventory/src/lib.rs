//! Inventory domain module.
//!
//! Ledger records and running balances, reservations with the reservation
//! guard, and picklists. Everything here is deterministic domain logic; the
//! balance store, bucket locks and the posting routine live in the infra crate.

pub mod ledger;
pub mod picking;
pub mod reservation;

pub use ledger::{
    IdempotencyKey, InventoryReason, LedgerEntry, PostingRequest, Reference, RunningEntry,
    apply_delta, replay, running_balances,
};
pub use picking::{PickItem, PickItemStatus, Picklist, PicklistStatus, derive_picklist_status};
pub use reservation::{
    Reservation, ReservationContext, ReservationStatus, check_reservation, open_demand,
    open_reserved_on_line, reserved_on_line,
};
