//! Stock bucket identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{BinId, LotId, ProductId, WarehouseId};

/// Identity of one stock balance: `(warehouse, bin-or-none, product, lot-or-none)`.
///
/// "No bin" and "no lot" are part of the identity. The constructor normalizes a
/// nil-UUID bin/lot to `None`, so the two spellings of "none" can never produce
/// two different buckets. Persisted layouts that need a non-null column use
/// [`BucketKey::bin_id_norm`] / [`BucketKey::lot_id_norm`], which map `None` back
/// to the nil-UUID sentinel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawBucketKey")]
pub struct BucketKey {
    warehouse_id: WarehouseId,
    bin_id: Option<BinId>,
    product_id: ProductId,
    lot_id: Option<LotId>,
}

/// Wire form of a [`BucketKey`], normalized on the way in.
#[derive(Deserialize)]
struct RawBucketKey {
    warehouse_id: WarehouseId,
    bin_id: Option<BinId>,
    product_id: ProductId,
    lot_id: Option<LotId>,
}

impl From<RawBucketKey> for BucketKey {
    fn from(raw: RawBucketKey) -> Self {
        Self::new(raw.warehouse_id, raw.bin_id, raw.product_id, raw.lot_id)
    }
}

impl BucketKey {
    pub fn new(
        warehouse_id: WarehouseId,
        bin_id: Option<BinId>,
        product_id: ProductId,
        lot_id: Option<LotId>,
    ) -> Self {
        Self {
            warehouse_id,
            bin_id: bin_id.filter(|b| !b.is_nil()),
            product_id,
            lot_id: lot_id.filter(|l| !l.is_nil()),
        }
    }

    /// Rebuild a key from its sentinel (normalized) column form.
    pub fn from_normalized(
        warehouse_id: WarehouseId,
        bin_id_norm: Uuid,
        product_id: ProductId,
        lot_id_norm: Uuid,
    ) -> Self {
        Self::new(
            warehouse_id,
            Some(BinId::from_uuid(bin_id_norm)),
            product_id,
            Some(LotId::from_uuid(lot_id_norm)),
        )
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn bin_id(&self) -> Option<BinId> {
        self.bin_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn lot_id(&self) -> Option<LotId> {
        self.lot_id
    }

    pub fn bin_id_norm(&self) -> Uuid {
        self.bin_id.map(Uuid::from).unwrap_or(Uuid::nil())
    }

    pub fn lot_id_norm(&self) -> Uuid {
        self.lot_id.map(Uuid::from).unwrap_or(Uuid::nil())
    }
}

impl core::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "warehouse {}, bin ", self.warehouse_id)?;
        match self.bin_id {
            Some(bin) => write!(f, "{bin}")?,
            None => f.write_str("-")?,
        }
        write!(f, ", product {}, lot ", self.product_id)?;
        match self.lot_id {
            Some(lot) => write!(f, "{lot}"),
            None => f.write_str("-"),
        }
    }
}
