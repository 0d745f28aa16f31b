use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, ProductId, Quantity, SalesOrderId, SalesOrderLineId,
    UnitId, UserId,
};
use stockledger_products::{ConversionTable, Product};

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Draft,
    Approved,
    PartShipped,
    Shipped,
    Cancelled,
}

impl SalesOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Approved => "APPROVED",
            Self::PartShipped => "PART_SHIPPED",
            Self::Shipped => "SHIPPED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "DRAFT" => Ok(Self::Draft),
            "APPROVED" => Ok(Self::Approved),
            "PART_SHIPPED" => Ok(Self::PartShipped),
            "SHIPPED" => Ok(Self::Shipped),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown sales order status: {other}"
            ))),
        }
    }
}

/// Sales order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    status: SalesOrderStatus,
    deleted: bool,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl SalesOrder {
    pub fn new(id: SalesOrderId, created_by: UserId) -> Self {
        Self {
            id,
            status: SalesOrderStatus::Draft,
            deleted: false,
            created_at: Utc::now(),
            created_by,
        }
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn approve(&mut self, live_lines: usize) -> DomainResult<()> {
        if self.status != SalesOrderStatus::Draft {
            return Err(DomainError::invariant("only draft sales orders can be approved"));
        }
        if live_lines == 0 {
            return Err(DomainError::validation("cannot approve sales order without lines"));
        }
        self.status = SalesOrderStatus::Approved;
        Ok(())
    }

    pub fn cancel(&mut self) -> DomainResult<()> {
        match self.status {
            SalesOrderStatus::Cancelled => Ok(()),
            SalesOrderStatus::PartShipped | SalesOrderStatus::Shipped => Err(
                DomainError::invariant("cannot cancel a sales order with shipments"),
            ),
            SalesOrderStatus::Draft | SalesOrderStatus::Approved => {
                self.status = SalesOrderStatus::Cancelled;
                Ok(())
            }
        }
    }

    /// Reservations and shipments are only taken for live, uncancelled orders.
    pub fn ensure_open(&self) -> DomainResult<()> {
        match self.status {
            SalesOrderStatus::Cancelled => Err(DomainError::invariant("sales order is cancelled")),
            _ => Ok(()),
        }
    }

    /// Re-derive the ship status from base-unit totals. Returns whether it changed.
    pub fn recompute_status(&mut self, ordered: Quantity, shipped: Quantity) -> bool {
        let next = derive_ship_status(self.status, ordered, shipped);
        let changed = next != self.status;
        self.status = next;
        changed
    }
}

impl Entity for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> SalesOrderId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Sales order line; `qty_ordered` is in the line's unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    id: SalesOrderLineId,
    order_id: SalesOrderId,
    line_no: u32,
    product_id: ProductId,
    unit_id: UnitId,
    qty_ordered: Quantity,
    deleted: bool,
}

impl SalesOrderLine {
    pub fn new(
        id: SalesOrderLineId,
        order_id: SalesOrderId,
        line_no: u32,
        product_id: ProductId,
        unit_id: UnitId,
        qty_ordered: Quantity,
    ) -> DomainResult<Self> {
        if !qty_ordered.is_positive() {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(Self {
            id,
            order_id,
            line_no,
            product_id,
            unit_id,
            qty_ordered,
            deleted: false,
        })
    }

    pub fn order_id(&self) -> SalesOrderId {
        self.order_id
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn qty_ordered(&self) -> Quantity {
        self.qty_ordered
    }

    /// Ordered quantity in the product's base unit.
    pub fn ordered_in_base(
        &self,
        product: &Product,
        conversions: &ConversionTable,
    ) -> DomainResult<Quantity> {
        if product.id() != self.product_id {
            return Err(DomainError::validation(format!(
                "product {} does not match line {} product {}",
                product.id(),
                self.line_no,
                self.product_id
            )));
        }
        conversions.convert(self.qty_ordered, self.unit_id, product.base_unit())
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Entity for SalesOrderLine {
    type Id = SalesOrderLineId;

    fn id(&self) -> SalesOrderLineId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// `max(ordered - open_reserved, 0)`, both in base units.
pub fn qty_to_reserve(ordered: Quantity, open_reserved: Quantity) -> Quantity {
    (ordered - open_reserved).clamp_non_negative()
}

/// Ship status from base-unit totals over live lines and live shipment items.
///
/// Cancelled orders are never touched, and with nothing shipped the current
/// status stands.
pub fn derive_ship_status(
    current: SalesOrderStatus,
    ordered: Quantity,
    shipped: Quantity,
) -> SalesOrderStatus {
    if current == SalesOrderStatus::Cancelled {
        return current;
    }
    if ordered.is_positive() && shipped >= ordered {
        SalesOrderStatus::Shipped
    } else if shipped.is_positive() {
        SalesOrderStatus::PartShipped
    } else {
        current
    }
}
