//! Row types for the PostgreSQL backend.
//!
//! Each row decodes with `try_get` by column name and converts into its domain
//! type by replaying the domain's own constructors and transitions, so a
//! stored row that violates a domain rule surfaces as a storage error instead
//! of an inconsistent value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use stockledger_core::{
    BucketKey, ConversionFactor, DomainError, DomainResult, LedgerEntryId, Quantity, WarehouseId,
};
use stockledger_inventory::{
    IdempotencyKey, InventoryReason, LedgerEntry, PickItem, PickItemStatus, Reference,
    Reservation, ReservationStatus,
};
use stockledger_products::{Product, UnitConversion};
use stockledger_purchasing::PurchaseOrderLine;
use stockledger_sales::SalesOrderLine;

use crate::error::{StoreError, StoreResult};

fn bucket_from(row: &PgRow) -> Result<BucketKey, sqlx::Error> {
    let warehouse_id: Uuid = row.try_get("warehouse_id")?;
    let product_id: Uuid = row.try_get("product_id")?;
    Ok(BucketKey::from_normalized(
        WarehouseId::from_uuid(warehouse_id),
        row.try_get("bin_id_norm")?,
        product_id.into(),
        row.try_get("lot_id_norm")?,
    ))
}

fn restore<T>(entity: &str, build: impl FnOnce() -> DomainResult<T>) -> StoreResult<T> {
    build().map_err(|err| StoreError::Storage(format!("stored {entity} row is invalid: {err}")))
}

#[derive(Debug, Clone)]
pub(crate) struct LedgerRow {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub bucket: BucketKey,
    pub qty_delta: Decimal,
    pub reason: String,
    pub ref_type: String,
    pub ref_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub created_by: Uuid,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            ts: row.try_get("ts")?,
            bucket: bucket_from(row)?,
            qty_delta: row.try_get("qty_delta")?,
            reason: row.try_get("reason")?,
            ref_type: row.try_get("ref_type")?,
            ref_id: row.try_get("ref_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> StoreResult<Self> {
        restore("ledger", || {
            Ok(LedgerEntry {
                id: LedgerEntryId::from_uuid(row.id),
                ts: row.ts,
                bucket: row.bucket,
                qty_delta: Quantity::new(row.qty_delta),
                reason: InventoryReason::parse(&row.reason)?,
                reference: Reference {
                    ref_type: row.ref_type,
                    ref_id: row.ref_id,
                },
                idempotency_key: row.idempotency_key.map(IdempotencyKey::new).transpose()?,
                actor: row.created_by.into(),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ReservationRow {
    pub id: Uuid,
    pub so_line_id: Uuid,
    pub bucket: BucketKey,
    pub qty_reserved: Decimal,
    pub qty_picked: Decimal,
    pub status: String,
    pub is_deleted: bool,
    pub created_by: Uuid,
}

impl<'r> FromRow<'r, PgRow> for ReservationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            so_line_id: row.try_get("so_line_id")?,
            bucket: bucket_from(row)?,
            qty_reserved: row.try_get("qty_reserved")?,
            qty_picked: row.try_get("qty_picked")?,
            status: row.try_get("status")?,
            is_deleted: row.try_get("is_deleted")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

/// Rebuilt for guard checks; `created_at` is not carried over.
impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> StoreResult<Self> {
        restore("reservation", || {
            let mut reservation = Reservation::new(
                row.id.into(),
                row.so_line_id.into(),
                row.bucket,
                Quantity::new(row.qty_reserved),
                row.created_by.into(),
            )?;
            let picked = Quantity::new(row.qty_picked);
            if picked.is_positive() {
                reservation = reservation.with_picked(picked)?;
            }
            match ReservationStatus::parse(&row.status)? {
                ReservationStatus::Released => reservation.release()?,
                ReservationStatus::Cancelled => reservation.cancel()?,
                ReservationStatus::Open | ReservationStatus::Picked => {}
            }
            if row.is_deleted {
                reservation.mark_deleted();
            }
            Ok(reservation)
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SalesOrderLineRow {
    pub id: Uuid,
    pub sales_order_id: Uuid,
    pub line_no: i32,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub qty_ordered: Decimal,
    pub is_deleted: bool,
}

impl<'r> FromRow<'r, PgRow> for SalesOrderLineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            sales_order_id: row.try_get("sales_order_id")?,
            line_no: row.try_get("line_no")?,
            product_id: row.try_get("product_id")?,
            unit_id: row.try_get("unit_id")?,
            qty_ordered: row.try_get("qty_ordered")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

impl TryFrom<SalesOrderLineRow> for SalesOrderLine {
    type Error = StoreError;

    fn try_from(row: SalesOrderLineRow) -> StoreResult<Self> {
        restore("sales order line", || {
            let mut line = SalesOrderLine::new(
                row.id.into(),
                row.sales_order_id.into(),
                line_no(row.line_no)?,
                row.product_id.into(),
                row.unit_id.into(),
                Quantity::new(row.qty_ordered),
            )?;
            if row.is_deleted {
                line.mark_deleted();
            }
            Ok(line)
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PurchaseOrderLineRow {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub line_no: i32,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub qty_ordered: Decimal,
    pub qty_received: Decimal,
    pub is_deleted: bool,
}

impl<'r> FromRow<'r, PgRow> for PurchaseOrderLineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            purchase_order_id: row.try_get("purchase_order_id")?,
            line_no: row.try_get("line_no")?,
            product_id: row.try_get("product_id")?,
            unit_id: row.try_get("unit_id")?,
            qty_ordered: row.try_get("qty_ordered")?,
            qty_received: row.try_get("qty_received")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

impl TryFrom<PurchaseOrderLineRow> for PurchaseOrderLine {
    type Error = StoreError;

    fn try_from(row: PurchaseOrderLineRow) -> StoreResult<Self> {
        restore("purchase order line", || {
            let mut line = PurchaseOrderLine::new(
                row.id.into(),
                row.purchase_order_id.into(),
                line_no(row.line_no)?,
                row.product_id.into(),
                row.unit_id.into(),
                Quantity::new(row.qty_ordered),
            )?;
            let received = Quantity::new(row.qty_received);
            if received.is_positive() {
                line.receive(received)?;
            }
            if row.is_deleted {
                line.mark_deleted();
            }
            Ok(line)
        })
    }
}

fn line_no(value: i32) -> DomainResult<u32> {
    u32::try_from(value)
        .map_err(|_| DomainError::validation(format!("invalid line number {value}")))
}

#[derive(Debug, Clone)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub base_unit_id: Uuid,
    pub is_deleted: bool,
    pub created_by: Uuid,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            base_unit_id: row.try_get("base_unit_id")?,
            is_deleted: row.try_get("is_deleted")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> StoreResult<Self> {
        restore("product", || {
            let mut product = Product::new(
                row.id.into(),
                row.sku,
                row.name,
                row.base_unit_id.into(),
                row.created_by.into(),
            )?;
            if row.is_deleted {
                product.mark_deleted();
            }
            Ok(product)
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PickItemRow {
    pub id: Uuid,
    pub picklist_id: Uuid,
    pub reservation_id: Uuid,
    pub bucket: BucketKey,
    pub qty_to_pick: Decimal,
    pub qty_picked: Decimal,
    pub status: String,
    pub is_deleted: bool,
}

impl<'r> FromRow<'r, PgRow> for PickItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            picklist_id: row.try_get("picklist_id")?,
            reservation_id: row.try_get("reservation_id")?,
            bucket: bucket_from(row)?,
            qty_to_pick: row.try_get("qty_to_pick")?,
            qty_picked: row.try_get("qty_picked")?,
            status: row.try_get("status")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

impl TryFrom<PickItemRow> for PickItem {
    type Error = StoreError;

    fn try_from(row: PickItemRow) -> StoreResult<Self> {
        restore("pick item", || {
            let mut item = PickItem::new(
                row.id.into(),
                row.picklist_id.into(),
                row.reservation_id.into(),
                row.bucket,
                Quantity::new(row.qty_to_pick),
            )?;
            let picked = Quantity::new(row.qty_picked);
            if picked.is_positive() {
                item = item.confirm(picked)?;
            }
            if PickItemStatus::parse(&row.status)? == PickItemStatus::Short {
                item.short()?;
            }
            if row.is_deleted {
                item.mark_deleted();
            }
            Ok(item)
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConversionRow {
    pub from_unit_id: Uuid,
    pub to_unit_id: Uuid,
    pub factor: Decimal,
}

impl<'r> FromRow<'r, PgRow> for ConversionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            from_unit_id: row.try_get("from_unit_id")?,
            to_unit_id: row.try_get("to_unit_id")?,
            factor: row.try_get("factor")?,
        })
    }
}

impl TryFrom<ConversionRow> for UnitConversion {
    type Error = StoreError;

    fn try_from(row: ConversionRow) -> StoreResult<Self> {
        restore("unit conversion", || {
            Ok(UnitConversion {
                from: row.from_unit_id.into(),
                to: row.to_unit_id.into(),
                factor: ConversionFactor::new(row.factor)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::ProductId;

    fn bucket() -> BucketKey {
        BucketKey::new(WarehouseId::new(), None, ProductId::new(), None)
    }

    fn reservation_row(reserved: i64, picked: i64, status: &str) -> ReservationRow {
        ReservationRow {
            id: Uuid::now_v7(),
            so_line_id: Uuid::now_v7(),
            bucket: bucket(),
            qty_reserved: Decimal::from(reserved),
            qty_picked: Decimal::from(picked),
            status: status.to_string(),
            is_deleted: false,
            created_by: Uuid::now_v7(),
        }
    }

    #[test]
    fn partially_picked_reservation_is_restored_open() {
        let reservation = Reservation::try_from(reservation_row(10, 4, "OPEN")).unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Open);
        assert_eq!(reservation.open_qty(), Quantity::units(6));
    }

    #[test]
    fn fully_picked_reservation_is_restored_picked() {
        let reservation = Reservation::try_from(reservation_row(10, 10, "PICKED")).unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Picked);
        assert_eq!(reservation.open_qty(), Quantity::ZERO);
    }

    #[test]
    fn released_reservation_holds_nothing() {
        let reservation = Reservation::try_from(reservation_row(10, 3, "RELEASED")).unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Released);
        assert_eq!(reservation.open_qty(), Quantity::ZERO);
    }

    #[test]
    fn unknown_status_is_a_storage_error() {
        let err = Reservation::try_from(reservation_row(10, 0, "LOST")).unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[test]
    fn shorted_pick_item_keeps_its_progress() {
        let row = PickItemRow {
            id: Uuid::now_v7(),
            picklist_id: Uuid::now_v7(),
            reservation_id: Uuid::now_v7(),
            bucket: bucket(),
            qty_to_pick: Decimal::from(5),
            qty_picked: Decimal::from(2),
            status: "SHORT".to_string(),
            is_deleted: false,
        };
        let item = PickItem::try_from(row).unwrap();
        assert_eq!(item.status(), PickItemStatus::Short);
        assert_eq!(item.qty_picked(), Quantity::units(2));
    }

    #[test]
    fn ledger_row_with_blank_key_is_rejected() {
        let row = LedgerRow {
            id: Uuid::now_v7(),
            ts: Utc::now(),
            bucket: bucket(),
            qty_delta: Decimal::from(5),
            reason: "RECEIVE".to_string(),
            ref_type: "manual".to_string(),
            ref_id: None,
            idempotency_key: Some("  ".to_string()),
            created_by: Uuid::now_v7(),
        };
        assert!(matches!(LedgerEntry::try_from(row), Err(StoreError::Storage(_))));
    }

    #[test]
    fn conversion_row_needs_a_positive_factor() {
        let row = ConversionRow {
            from_unit_id: Uuid::now_v7(),
            to_unit_id: Uuid::now_v7(),
            factor: Decimal::ZERO,
        };
        assert!(matches!(UnitConversion::try_from(row), Err(StoreError::Storage(_))));
    }
}
