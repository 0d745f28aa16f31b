use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, LotId, ProductId, Quantity, ReservationId, SalesOrderId,
    ShipmentId, ShipmentItemId, UserId, WarehouseId,
};

/// Shipment header against one sales order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    id: ShipmentId,
    sales_order_id: SalesOrderId,
    warehouse_id: WarehouseId,
    deleted: bool,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl Shipment {
    pub fn new(
        id: ShipmentId,
        sales_order_id: SalesOrderId,
        warehouse_id: WarehouseId,
        created_by: UserId,
    ) -> Self {
        Self {
            id,
            sales_order_id,
            warehouse_id,
            deleted: false,
            created_at: Utc::now(),
            created_by,
        }
    }

    pub fn sales_order_id(&self) -> SalesOrderId {
        self.sales_order_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }
}

impl Entity for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> ShipmentId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Shipped quantity, always in the product's base unit.
///
/// `reservation_id` is set when the item was generated from a picked
/// reservation, so the same reservation is never shipped twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentItem {
    id: ShipmentItemId,
    shipment_id: ShipmentId,
    product_id: ProductId,
    lot_id: Option<LotId>,
    qty_shipped: Quantity,
    reservation_id: Option<ReservationId>,
    deleted: bool,
}

impl ShipmentItem {
    pub fn new(
        id: ShipmentItemId,
        shipment_id: ShipmentId,
        product_id: ProductId,
        lot_id: Option<LotId>,
        qty_shipped: Quantity,
    ) -> DomainResult<Self> {
        if !qty_shipped.is_positive() {
            return Err(DomainError::validation("shipped quantity must be positive"));
        }
        Ok(Self {
            id,
            shipment_id,
            product_id,
            lot_id: lot_id.filter(|l| !l.is_nil()),
            qty_shipped,
            reservation_id: None,
            deleted: false,
        })
    }

    pub fn from_reservation(mut self, reservation_id: ReservationId) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    pub fn shipment_id(&self) -> ShipmentId {
        self.shipment_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn lot_id(&self) -> Option<LotId> {
        self.lot_id
    }

    pub fn qty_shipped(&self) -> Quantity {
        self.qty_shipped
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.reservation_id
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Entity for ShipmentItem {
    type Id = ShipmentItemId;

    fn id(&self) -> ShipmentItemId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Total shipped over live items.
pub fn total_shipped<'a>(items: impl IntoIterator<Item = &'a ShipmentItem>) -> Quantity {
    items
        .into_iter()
        .filter(|i| !i.is_deleted())
        .map(ShipmentItem::qty_shipped)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantity_is_rejected() {
        let err = ShipmentItem::new(
            ShipmentItemId::new(),
            ShipmentId::new(),
            ProductId::new(),
            None,
            Quantity::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn deleted_items_do_not_count() {
        let shipment = ShipmentId::new();
        let product = ProductId::new();
        let kept =
            ShipmentItem::new(ShipmentItemId::new(), shipment, product, None, Quantity::units(3))
                .unwrap();
        let mut dropped =
            ShipmentItem::new(ShipmentItemId::new(), shipment, product, None, Quantity::units(9))
                .unwrap();
        dropped.mark_deleted();
        assert_eq!(total_shipped([&kept, &dropped]), Quantity::units(3));
    }
}
