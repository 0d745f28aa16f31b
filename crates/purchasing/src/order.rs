use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, ProductId, PurchaseOrderId, PurchaseOrderLineId, Quantity,
    UnitId, UserId,
};

/// Purchase order status lifecycle.
///
/// `Draft -> Approved` and `-> Cancelled` are set by callers; `Received` is
/// derived from the lines and never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Approved => "APPROVED",
            Self::Received => "RECEIVED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "DRAFT" => Ok(Self::Draft),
            "APPROVED" => Ok(Self::Approved),
            "RECEIVED" => Ok(Self::Received),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status: {other}"
            ))),
        }
    }
}

/// Purchase order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    status: PurchaseOrderStatus,
    deleted: bool,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl PurchaseOrder {
    pub fn new(id: PurchaseOrderId, created_by: UserId) -> Self {
        Self {
            id,
            status: PurchaseOrderStatus::Draft,
            deleted: false,
            created_at: Utc::now(),
            created_by,
        }
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    /// `Draft -> Approved`. An order without live lines cannot be approved.
    pub fn approve(&mut self, live_lines: usize) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant(
                "only draft purchase orders can be approved",
            ));
        }
        if live_lines == 0 {
            return Err(DomainError::validation(
                "cannot approve purchase order without lines",
            ));
        }
        self.status = PurchaseOrderStatus::Approved;
        Ok(())
    }

    /// External cancellation. Cancelling twice is a no-op.
    pub fn cancel(&mut self) -> DomainResult<()> {
        match self.status {
            PurchaseOrderStatus::Cancelled => Ok(()),
            PurchaseOrderStatus::Received => Err(DomainError::invariant(
                "cannot cancel a received purchase order",
            )),
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Approved => {
                self.status = PurchaseOrderStatus::Cancelled;
                Ok(())
            }
        }
    }

    pub fn ensure_receivable(&self) -> DomainResult<()> {
        match self.status {
            PurchaseOrderStatus::Approved => Ok(()),
            PurchaseOrderStatus::Draft => Err(DomainError::invariant(
                "cannot receive goods before purchase order is approved",
            )),
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled => Err(
                DomainError::invariant(format!(
                    "purchase order is {} and no longer open for receipt",
                    self.status.as_str()
                )),
            ),
        }
    }

    /// Re-derive the header status from the current lines. Returns whether it changed.
    pub fn recompute_status<'a>(
        &mut self,
        lines: impl IntoIterator<Item = &'a PurchaseOrderLine>,
    ) -> bool {
        let next = derive_received_status(self.status, lines);
        let changed = next != self.status;
        self.status = next;
        changed
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> PurchaseOrderId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Purchase order line. `qty_ordered` and `qty_received` are in the line's unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    id: PurchaseOrderLineId,
    order_id: PurchaseOrderId,
    line_no: u32,
    product_id: ProductId,
    unit_id: UnitId,
    qty_ordered: Quantity,
    qty_received: Quantity,
    deleted: bool,
}

impl PurchaseOrderLine {
    pub fn new(
        id: PurchaseOrderLineId,
        order_id: PurchaseOrderId,
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
            qty_received: Quantity::ZERO,
            deleted: false,
        })
    }

    pub fn order_id(&self) -> PurchaseOrderId {
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

    pub fn qty_received(&self) -> Quantity {
        self.qty_received
    }

    /// `max(ordered - received, 0)`.
    pub fn qty_outstanding(&self) -> Quantity {
        (self.qty_ordered - self.qty_received).clamp_non_negative()
    }

    pub fn is_open(&self) -> bool {
        self.qty_received < self.qty_ordered
    }

    /// Check a receipt of `qty` (line unit) without applying it.
    pub fn check_receipt(&self, qty: Quantity) -> DomainResult<Quantity> {
        if !qty.is_positive() {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        let received = self.qty_received.checked_add(qty)?;
        if received > self.qty_ordered {
            return Err(DomainError::validation(format!(
                "received {received} exceeds ordered {} on line {}",
                self.qty_ordered, self.line_no
            )));
        }
        Ok(received)
    }

    pub fn receive(&mut self, qty: Quantity) -> DomainResult<()> {
        self.qty_received = self.check_receipt(qty)?;
        Ok(())
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Entity for PurchaseOrderLine {
    type Id = PurchaseOrderLineId;

    fn id(&self) -> PurchaseOrderLineId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Received status of a purchase order given its lines.
///
/// Only an approved order moves, and only to `Received`, once no live line is
/// still short. An approved order whose lines were all deleted has nothing
/// short and counts as received. Everything else keeps its current status.
pub fn derive_received_status<'a>(
    current: PurchaseOrderStatus,
    lines: impl IntoIterator<Item = &'a PurchaseOrderLine>,
) -> PurchaseOrderStatus {
    if current != PurchaseOrderStatus::Approved {
        return current;
    }
    if lines.into_iter().any(|l| !l.is_deleted() && l.is_open()) {
        current
    } else {
        PurchaseOrderStatus::Received
    }
}
