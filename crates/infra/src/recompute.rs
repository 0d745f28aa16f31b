//! Derived-status recomputation.
//!
//! Header statuses are re-derived from the current detail rows every time a
//! detail row changes, never incremented. Running a recompute twice over the
//! same rows leaves the header as the first run did. Callers invoke these at
//! the end of each detail write, while still holding the table locks that
//! write took.

use tracing::debug;

use stockledger_core::{
    DomainError, DomainResult, Entity, PicklistId, PurchaseOrderId, Quantity, SalesOrderId,
};
use stockledger_inventory::{PickItem, Picklist, PicklistStatus};
use stockledger_products::{ConversionTable, Product};
use stockledger_purchasing::{PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};
use stockledger_sales::{
    SalesOrder, SalesOrderLine, SalesOrderStatus, Shipment, ShipmentItem, total_shipped,
};

use crate::store::Rows;

pub fn purchase_order(
    orders: &mut Rows<PurchaseOrder>,
    lines: &Rows<PurchaseOrderLine>,
    order_id: PurchaseOrderId,
) -> DomainResult<PurchaseOrderStatus> {
    let order = orders.live_mut(order_id)?;
    let before = order.status();
    if order.recompute_status(lines.filter(|l| l.order_id() == order_id)) {
        debug!(%order_id, from = before.as_str(), to = order.status().as_str(), "purchase order status recomputed");
    }
    Ok(order.status())
}

pub fn picklist(
    picklists: &mut Rows<Picklist>,
    items: &Rows<PickItem>,
    picklist_id: PicklistId,
) -> DomainResult<PicklistStatus> {
    let list = picklists.live_mut(picklist_id)?;
    let before = list.status();
    if list.recompute_status(items.filter(|i| i.picklist_id() == picklist_id)) {
        debug!(%picklist_id, from = before.as_str(), to = list.status().as_str(), "picklist status recomputed");
    }
    Ok(list.status())
}

/// Rows the sales-order ship status is derived from.
pub struct SalesDetails<'a> {
    pub lines: &'a Rows<SalesOrderLine>,
    pub shipments: &'a Rows<Shipment>,
    pub shipment_items: &'a Rows<ShipmentItem>,
    pub products: &'a Rows<Product>,
    pub conversions: &'a ConversionTable,
}

impl SalesDetails<'_> {
    /// Σ ordered over live lines, in each product's base unit.
    pub fn ordered(&self, order_id: SalesOrderId) -> DomainResult<Quantity> {
        let mut total = Quantity::ZERO;
        for line in self.lines.filter(|l| l.order_id() == order_id && !l.is_deleted()) {
            let product = self
                .products
                .get(line.product_id())
                .ok_or_else(|| DomainError::not_found("product", line.product_id()))?;
            total = total.checked_add(line.ordered_in_base(product, self.conversions)?)?;
        }
        Ok(total)
    }

    /// Σ shipped over live items of live shipments of the order.
    pub fn shipped(&self, order_id: SalesOrderId) -> Quantity {
        let shipments: Vec<_> = self
            .shipments
            .filter(|s| s.sales_order_id() == order_id && !s.is_deleted())
            .map(Entity::id)
            .collect();
        total_shipped(
            self.shipment_items
                .filter(|i| shipments.contains(&i.shipment_id())),
        )
    }

    pub fn recompute(
        &self,
        orders: &mut Rows<SalesOrder>,
        order_id: SalesOrderId,
    ) -> DomainResult<SalesOrderStatus> {
        let ordered = self.ordered(order_id)?;
        let shipped = self.shipped(order_id);
        let order = orders.live_mut(order_id)?;
        let before = order.status();
        if order.recompute_status(ordered, shipped) {
            debug!(%order_id, %ordered, %shipped, from = before.as_str(), to = order.status().as_str(), "sales order status recomputed");
        }
        Ok(order.status())
    }
}
