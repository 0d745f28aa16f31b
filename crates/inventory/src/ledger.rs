use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{BucketKey, DomainError, DomainResult, LedgerEntryId, Quantity, UserId};

/// Why a quantity moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryReason {
    Receive,
    IssuePick,
    TransferOut,
    TransferIn,
    AdjustPos,
    AdjustNeg,
    ReturnFromCust,
    ReturnToSupp,
}

impl InventoryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "RECEIVE",
            Self::IssuePick => "ISSUE_PICK",
            Self::TransferOut => "TRANSFER_OUT",
            Self::TransferIn => "TRANSFER_IN",
            Self::AdjustPos => "ADJUST_POS",
            Self::AdjustNeg => "ADJUST_NEG",
            Self::ReturnFromCust => "RETURN_FROM_CUST",
            Self::ReturnToSupp => "RETURN_TO_SUPP",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        Ok(match value {
            "RECEIVE" => Self::Receive,
            "ISSUE_PICK" => Self::IssuePick,
            "TRANSFER_OUT" => Self::TransferOut,
            "TRANSFER_IN" => Self::TransferIn,
            "ADJUST_POS" => Self::AdjustPos,
            "ADJUST_NEG" => Self::AdjustNeg,
            "RETURN_FROM_CUST" => Self::ReturnFromCust,
            "RETURN_TO_SUPP" => Self::ReturnToSupp,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown inventory reason: {other}"
                )));
            }
        })
    }
}

impl core::fmt::Display for InventoryReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business document a posting belongs to, e.g. `("purchase_order_line", <id>)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub ref_type: String,
    pub ref_id: Option<Uuid>,
}

impl Reference {
    pub fn to(ref_type: impl Into<String>, ref_id: impl Into<Uuid>) -> Self {
        Self {
            ref_type: ref_type.into(),
            ref_id: Some(ref_id.into()),
        }
    }

    /// Free-standing adjustment with no source document.
    pub fn manual() -> Self {
        Self {
            ref_type: "manual".to_string(),
            ref_id: None,
        }
    }
}

/// Caller-chosen key that makes a posting at-most-once under retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("idempotency key cannot be blank"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input of one posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub bucket: BucketKey,
    pub qty_delta: Quantity,
    pub reason: InventoryReason,
    pub reference: Reference,
    pub idempotency_key: Option<IdempotencyKey>,
    pub actor: UserId,
}

impl PostingRequest {
    pub fn new(
        bucket: BucketKey,
        qty_delta: Quantity,
        reason: InventoryReason,
        reference: Reference,
        actor: UserId,
    ) -> Self {
        Self {
            bucket,
            qty_delta,
            reason,
            reference,
            idempotency_key: None,
            actor,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.qty_delta.is_zero() {
            return Err(DomainError::validation("qty_delta cannot be zero"));
        }
        if self.reference.ref_type.trim().is_empty() {
            return Err(DomainError::validation("reference type cannot be empty"));
        }
        Ok(())
    }
}

/// Immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub ts: DateTime<Utc>,
    pub bucket: BucketKey,
    pub qty_delta: Quantity,
    pub reason: InventoryReason,
    pub reference: Reference,
    pub idempotency_key: Option<IdempotencyKey>,
    pub actor: UserId,
}

impl LedgerEntry {
    pub fn record(id: LedgerEntryId, ts: DateTime<Utc>, request: &PostingRequest) -> Self {
        Self {
            id,
            ts,
            bucket: request.bucket,
            qty_delta: request.qty_delta,
            reason: request.reason,
            reference: request.reference.clone(),
            idempotency_key: request.idempotency_key.clone(),
            actor: request.actor,
        }
    }

    /// A retry carries the same bucket, delta, reason and reference. The actor
    /// may differ.
    pub fn same_payload(&self, request: &PostingRequest) -> bool {
        self.bucket == request.bucket
            && self.qty_delta == request.qty_delta
            && self.reason == request.reason
            && self.reference == request.reference
    }
}

/// Outcome of resolving an idempotency key against an already stored entry.
pub fn replay(existing: &LedgerEntry, request: &PostingRequest) -> DomainResult<LedgerEntryId> {
    if existing.same_payload(request) {
        Ok(existing.id)
    } else {
        Err(DomainError::conflict(format!(
            "idempotency key {} already used for a different posting",
            existing
                .idempotency_key
                .as_ref()
                .map(IdempotencyKey::as_str)
                .unwrap_or_default()
        )))
    }
}

/// New on-hand after applying `delta`, or `InsufficientStock` if it would go negative.
pub fn apply_delta(bucket: BucketKey, on_hand: Quantity, delta: Quantity) -> DomainResult<Quantity> {
    let next = on_hand.checked_add(delta)?;
    if next.is_negative() {
        return Err(DomainError::insufficient_stock(bucket, -delta, on_hand));
    }
    Ok(next)
}

/// Ledger entry with the bucket balance right after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningEntry {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub running_qty: Quantity,
}

/// Prefix sums over entries already in posting order.
pub fn running_balances(entries: impl IntoIterator<Item = LedgerEntry>) -> Vec<RunningEntry> {
    let mut running = Quantity::ZERO;
    entries
        .into_iter()
        .map(|entry| {
            running += entry.qty_delta;
            RunningEntry {
                entry,
                running_qty: running,
            }
        })
        .collect()
}
