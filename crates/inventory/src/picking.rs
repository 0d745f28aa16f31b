use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    BucketKey, DomainError, DomainResult, Entity, PickItemId, PicklistId, Quantity,
    ReservationId, SalesOrderId, UserId, WarehouseId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PicklistStatus {
    Open,
    InProgress,
    Closed,
}

impl PicklistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "OPEN" => Ok(Self::Open),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "CLOSED" => Ok(Self::Closed),
            other => Err(DomainError::validation(format!(
                "unknown picklist status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickItemStatus {
    Open,
    Picked,
    Short,
}

impl PickItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Picked => "PICKED",
            Self::Short => "SHORT",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "OPEN" => Ok(Self::Open),
            "PICKED" => Ok(Self::Picked),
            "SHORT" => Ok(Self::Short),
            other => Err(DomainError::validation(format!(
                "unknown pick item status: {other}"
            ))),
        }
    }
}

/// Picklist for one sales order in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picklist {
    id: PicklistId,
    sales_order_id: SalesOrderId,
    warehouse_id: WarehouseId,
    status: PicklistStatus,
    deleted: bool,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl Picklist {
    pub fn new(
        id: PicklistId,
        sales_order_id: SalesOrderId,
        warehouse_id: WarehouseId,
        created_by: UserId,
    ) -> Self {
        Self {
            id,
            sales_order_id,
            warehouse_id,
            status: PicklistStatus::Open,
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

    pub fn status(&self) -> PicklistStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != PicklistStatus::Open {
            return Err(DomainError::invariant(format!(
                "only open picklists can be started; picklist {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = PicklistStatus::InProgress;
        Ok(())
    }

    pub fn recompute_status<'a>(&mut self, items: impl IntoIterator<Item = &'a PickItem>) -> bool {
        let next = derive_picklist_status(self.status, items);
        let changed = next != self.status;
        self.status = next;
        changed
    }
}

impl Entity for Picklist {
    type Id = PicklistId;

    fn id(&self) -> PicklistId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickItem {
    id: PickItemId,
    picklist_id: PicklistId,
    reservation_id: ReservationId,
    bucket: BucketKey,
    qty_to_pick: Quantity,
    qty_picked: Quantity,
    status: PickItemStatus,
    deleted: bool,
}

impl PickItem {
    pub fn new(
        id: PickItemId,
        picklist_id: PicklistId,
        reservation_id: ReservationId,
        bucket: BucketKey,
        qty_to_pick: Quantity,
    ) -> DomainResult<Self> {
        if !qty_to_pick.is_positive() {
            return Err(DomainError::validation("quantity to pick must be positive"));
        }
        Ok(Self {
            id,
            picklist_id,
            reservation_id,
            bucket,
            qty_to_pick,
            qty_picked: Quantity::ZERO,
            status: PickItemStatus::Open,
            deleted: false,
        })
    }

    pub fn picklist_id(&self) -> PicklistId {
        self.picklist_id
    }

    pub fn reservation_id(&self) -> ReservationId {
        self.reservation_id
    }

    pub fn bucket(&self) -> BucketKey {
        self.bucket
    }

    pub fn qty_to_pick(&self) -> Quantity {
        self.qty_to_pick
    }

    pub fn qty_picked(&self) -> Quantity {
        self.qty_picked
    }

    pub fn status(&self) -> PickItemStatus {
        self.status
    }

    /// Candidate after picking `qty` more. Fully picked items become `Picked`.
    pub fn confirm(&self, qty: Quantity) -> DomainResult<PickItem> {
        if self.status != PickItemStatus::Open {
            return Err(DomainError::invariant(format!(
                "pick item {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        if !qty.is_positive() {
            return Err(DomainError::validation("picked quantity must be positive"));
        }
        let picked = self.qty_picked.checked_add(qty)?;
        if picked > self.qty_to_pick {
            return Err(DomainError::invariant(format!(
                "picked quantity {picked} exceeds quantity to pick {}",
                self.qty_to_pick
            )));
        }
        let mut next = self.clone();
        next.qty_picked = picked;
        if picked == self.qty_to_pick {
            next.status = PickItemStatus::Picked;
        }
        Ok(next)
    }

    pub fn short(&mut self) -> DomainResult<()> {
        if self.status != PickItemStatus::Open {
            return Err(DomainError::invariant(format!(
                "only open pick items can be shorted; pick item {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = PickItemStatus::Short;
        Ok(())
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Entity for PickItem {
    type Id = PickItemId;

    fn id(&self) -> PickItemId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// `Closed` once every live item is `Picked`; a closed list never reopens and
/// an empty list never closes.
pub fn derive_picklist_status<'a>(
    current: PicklistStatus,
    items: impl IntoIterator<Item = &'a PickItem>,
) -> PicklistStatus {
    if current == PicklistStatus::Closed {
        return current;
    }
    let mut live = items.into_iter().filter(|i| !i.is_deleted()).peekable();
    if live.peek().is_none() {
        return current;
    }
    if live.all(|i| i.status == PickItemStatus::Picked) {
        PicklistStatus::Closed
    } else {
        current
    }
}
