//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of an actor (user) recorded on every mutation.
    UserId,
    "UserId"
);
uuid_newtype!(WarehouseId, "WarehouseId");
uuid_newtype!(BinId, "BinId");
uuid_newtype!(ProductId, "ProductId");
uuid_newtype!(LotId, "LotId");
uuid_newtype!(
    /// Identifier of a unit of measure (EA, BOX, KG, ...).
    UnitId,
    "UnitId"
);
uuid_newtype!(PurchaseOrderId, "PurchaseOrderId");
uuid_newtype!(PurchaseOrderLineId, "PurchaseOrderLineId");
uuid_newtype!(SalesOrderId, "SalesOrderId");
uuid_newtype!(SalesOrderLineId, "SalesOrderLineId");
uuid_newtype!(ShipmentId, "ShipmentId");
uuid_newtype!(ShipmentItemId, "ShipmentItemId");
uuid_newtype!(ReservationId, "ReservationId");
uuid_newtype!(PicklistId, "PicklistId");
uuid_newtype!(PickItemId, "PickItemId");
uuid_newtype!(
    /// Identifier of an immutable inventory ledger entry.
    LedgerEntryId,
    "LedgerEntryId"
);
