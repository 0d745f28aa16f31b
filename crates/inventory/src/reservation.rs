//! Reservations and the reservation guard.
//!
//! A reservation is a soft hold of stock in one bucket against one sales order
//! line. Every create/update is checked by [`check_reservation`] before it is
//! stored. The check is a pure function of the state passed in; callers must
//! gather that state while holding the bucket lock so two concurrent attempts
//! on the same bucket serialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    BucketKey, DomainError, DomainResult, Entity, Quantity, ReservationId, SalesOrderLineId,
    UserId,
};
use stockledger_products::{ConversionTable, Product};
use stockledger_sales::SalesOrderLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Open,
    Picked,
    Released,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Picked => "PICKED",
            Self::Released => "RELEASED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "OPEN" => Ok(Self::Open),
            "PICKED" => Ok(Self::Picked),
            "RELEASED" => Ok(Self::Released),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }

    /// Whether unpicked quantity in this status still holds stock.
    pub fn holds_stock(&self) -> bool {
        matches!(self, Self::Open | Self::Picked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    order_line_id: SalesOrderLineId,
    bucket: BucketKey,
    qty_reserved: Quantity,
    qty_picked: Quantity,
    status: ReservationStatus,
    deleted: bool,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        order_line_id: SalesOrderLineId,
        bucket: BucketKey,
        qty_reserved: Quantity,
        created_by: UserId,
    ) -> DomainResult<Self> {
        if !qty_reserved.is_positive() {
            return Err(DomainError::validation("reserved quantity must be positive"));
        }
        Ok(Self {
            id,
            order_line_id,
            bucket,
            qty_reserved,
            qty_picked: Quantity::ZERO,
            status: ReservationStatus::Open,
            deleted: false,
            created_at: Utc::now(),
            created_by,
        })
    }

    pub fn order_line_id(&self) -> SalesOrderLineId {
        self.order_line_id
    }

    pub fn bucket(&self) -> BucketKey {
        self.bucket
    }

    pub fn qty_reserved(&self) -> Quantity {
        self.qty_reserved
    }

    pub fn qty_picked(&self) -> Quantity {
        self.qty_picked
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    /// Reserved but not yet picked, while the reservation still holds stock.
    pub fn open_qty(&self) -> Quantity {
        if self.deleted || !self.status.holds_stock() {
            return Quantity::ZERO;
        }
        self.qty_reserved - self.qty_picked
    }

    /// Candidate with `qty_picked` raised to `qty_picked`. Status follows: fully
    /// picked becomes `Picked`. The bound against `qty_reserved` is left to
    /// [`check_reservation`].
    pub fn with_picked(&self, qty_picked: Quantity) -> DomainResult<Reservation> {
        if !self.status.holds_stock() {
            return Err(DomainError::invariant(format!(
                "reservation {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        if qty_picked < self.qty_picked {
            return Err(DomainError::validation(format!(
                "picked quantity cannot decrease ({} -> {qty_picked})",
                self.qty_picked
            )));
        }
        let mut next = self.clone();
        next.qty_picked = qty_picked;
        next.status = if qty_picked >= self.qty_reserved {
            ReservationStatus::Picked
        } else {
            ReservationStatus::Open
        };
        Ok(next)
    }

    pub fn release(&mut self) -> DomainResult<()> {
        self.close(ReservationStatus::Released)
    }

    pub fn cancel(&mut self) -> DomainResult<()> {
        self.close(ReservationStatus::Cancelled)
    }

    fn close(&mut self, status: ReservationStatus) -> DomainResult<()> {
        if self.status != ReservationStatus::Open {
            return Err(DomainError::invariant(format!(
                "only open reservations can be {}; reservation {} is {}",
                status.as_str().to_lowercase(),
                self.id,
                self.status.as_str()
            )));
        }
        self.status = status;
        Ok(())
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> ReservationId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Open demand on `bucket`: `Σ(reserved - picked)` over live OPEN/PICKED
/// reservations, skipping `exclude`.
pub fn open_demand<'a>(
    bucket: BucketKey,
    reservations: impl IntoIterator<Item = &'a Reservation>,
    exclude: Option<ReservationId>,
) -> Quantity {
    reservations
        .into_iter()
        .filter(|r| r.bucket == bucket && Some(r.id) != exclude)
        .map(Reservation::open_qty)
        .sum()
}

/// Σ `qty_reserved` over live reservations of one line, skipping `exclude`.
pub fn reserved_on_line<'a>(
    line: SalesOrderLineId,
    reservations: impl IntoIterator<Item = &'a Reservation>,
    exclude: Option<ReservationId>,
) -> Quantity {
    reservations
        .into_iter()
        .filter(|r| r.order_line_id == line && !r.deleted && Some(r.id) != exclude)
        .map(|r| r.qty_reserved)
        .sum()
}

/// Σ open quantity over the reservations of one line.
pub fn open_reserved_on_line<'a>(
    line: SalesOrderLineId,
    reservations: impl IntoIterator<Item = &'a Reservation>,
) -> Quantity {
    reservations
        .into_iter()
        .filter(|r| r.order_line_id == line)
        .map(Reservation::open_qty)
        .sum()
}

/// Live state a reservation write is checked against.
pub struct ReservationContext<'a> {
    pub line: &'a SalesOrderLine,
    pub product: &'a Product,
    pub conversions: &'a ConversionTable,
    /// Every reservation of the line, the stored version of the candidate included.
    pub line_reservations: &'a [Reservation],
    /// On-hand of the candidate's bucket.
    pub on_hand: Quantity,
    /// Every reservation on the candidate's bucket.
    pub bucket_reservations: &'a [Reservation],
}

/// Validate a reservation create (`previous == None`) or update.
pub fn check_reservation(
    candidate: &Reservation,
    previous: Option<&Reservation>,
    ctx: &ReservationContext<'_>,
) -> DomainResult<()> {
    let line = ctx.line;
    if line.is_deleted() || line.id() != candidate.order_line_id {
        return Err(DomainError::not_found(
            "sales order line",
            candidate.order_line_id,
        ));
    }
    if ctx.product.is_deleted() {
        return Err(DomainError::not_found("product", ctx.product.id()));
    }
    if candidate.bucket.product_id() != line.product_id() {
        return Err(DomainError::validation(format!(
            "reservation product {} does not match order line product {}",
            candidate.bucket.product_id(),
            line.product_id()
        )));
    }

    let limit = line.ordered_in_base(ctx.product, ctx.conversions)?;
    let total = reserved_on_line(line.id(), ctx.line_reservations, Some(candidate.id))
        .checked_add(candidate.qty_reserved)?;
    if total > limit {
        return Err(DomainError::validation(format!(
            "total reserved exceeds ordered: {total} > {limit} on line {}",
            line.id()
        )));
    }

    if candidate.qty_picked > candidate.qty_reserved {
        return Err(DomainError::invariant(format!(
            "picked quantity {} exceeds reserved quantity {}",
            candidate.qty_picked, candidate.qty_reserved
        )));
    }

    let delta = match previous {
        None => candidate.qty_reserved,
        Some(prev) => (candidate.qty_reserved - prev.qty_reserved).clamp_non_negative(),
    };
    if delta.is_positive() {
        let available = ctx.on_hand
            - open_demand(candidate.bucket, ctx.bucket_reservations, Some(candidate.id));
        if available < delta {
            return Err(DomainError::insufficient_stock(
                candidate.bucket,
                delta,
                available,
            ));
        }
    }
    Ok(())
}
