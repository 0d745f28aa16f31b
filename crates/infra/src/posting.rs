//! Ledger poster and write-path guard.
//!
//! [`LedgerPoster::post`] is the only routine that changes on-hand stock. One
//! call, run under the bucket lock:
//!
//! 1. lock the bucket (created at zero if new)
//! 2. compute `on_hand + delta`; a negative result fails with `InsufficientStock`
//!    and nothing is written
//! 3. append the ledger entry, then store the new on-hand
//!
//! A posting whose idempotency key is already in the ledger writes nothing. It
//! returns the stored entry's id when the payload matches, and `Conflict`
//! otherwise.
//!
//! ## Write-path guard
//!
//! Both writes need a [`PostingScope`]. Only this module can open one, and a
//! scope is bound to a single bucket and allows one balance write plus one
//! ledger append. Any other use is rejected with `InvariantViolation`. The
//! balance and ledger write methods are crate-private, so code outside the
//! crate sees read-only views only.

use std::cell::Cell;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use stockledger_core::{BucketKey, DomainError, DomainResult, LedgerEntryId};
use stockledger_inventory::{LedgerEntry, PostingRequest, apply_delta, replay};

use crate::error::{LogRejection, StoreResult};
use crate::store::ledger::Appended;
use crate::store::{BalanceStore, BucketGuard, LedgerTable};

/// Capability to write one bucket's balance and append its ledger entry.
#[derive(Debug)]
pub struct PostingScope {
    bucket: BucketKey,
    balance_written: Cell<bool>,
    entry_appended: Cell<bool>,
}

impl PostingScope {
    fn open(bucket: BucketKey) -> Self {
        Self {
            bucket,
            balance_written: Cell::new(false),
            entry_appended: Cell::new(false),
        }
    }

    fn authorize(&self, bucket: BucketKey, used: &Cell<bool>, what: &str) -> DomainResult<()> {
        if bucket != self.bucket {
            return Err(DomainError::invariant(format!(
                "{what} for {bucket} outside its posting scope"
            )));
        }
        if used.replace(true) {
            return Err(DomainError::invariant(format!(
                "{what} for {bucket} repeated within one posting"
            )));
        }
        Ok(())
    }

    pub(crate) fn authorize_balance_write(&self, bucket: BucketKey) -> DomainResult<()> {
        self.authorize(bucket, &self.balance_written, "balance write")
    }

    pub(crate) fn authorize_ledger_append(&self, bucket: BucketKey) -> DomainResult<()> {
        self.authorize(bucket, &self.entry_appended, "ledger append")
    }
}

/// The single authorized write path for stock quantities.
#[derive(Debug, Clone, Copy)]
pub struct LedgerPoster<'a> {
    balances: &'a BalanceStore,
    ledger: &'a LedgerTable,
    lock_timeout: Duration,
}

impl<'a> LedgerPoster<'a> {
    pub fn new(balances: &'a BalanceStore, ledger: &'a LedgerTable, lock_timeout: Duration) -> Self {
        Self {
            balances,
            ledger,
            lock_timeout,
        }
    }

    #[instrument(
        skip(self, request),
        fields(
            bucket = %request.bucket,
            qty_delta = %request.qty_delta,
            reason = %request.reason
        )
    )]
    pub fn post(&self, request: &PostingRequest) -> StoreResult<LedgerEntryId> {
        self.lock_and_post(request).log_rejection("post")
    }

    fn lock_and_post(&self, request: &PostingRequest) -> StoreResult<LedgerEntryId> {
        request.validate()?;
        let mut guard = self.balances.lock(request.bucket, self.lock_timeout)?;
        self.post_locked(&mut guard, request)
    }

    /// Post while the caller already holds the bucket lock, so a posting can
    /// share one critical section with the detail-row write that caused it.
    pub(crate) fn post_locked(
        &self,
        guard: &mut BucketGuard,
        request: &PostingRequest,
    ) -> StoreResult<LedgerEntryId> {
        request.validate()?;
        if guard.bucket() != request.bucket {
            return Err(DomainError::invariant(format!(
                "posting to {} while holding the lock on {}",
                request.bucket,
                guard.bucket()
            ))
            .into());
        }
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.ledger.find_by_key(key) {
                debug!(entry_id = %existing.id, key = %key, "idempotent replay");
                return Ok(replay(&existing, request)?);
            }
        }

        let on_hand = guard.on_hand();
        let next = apply_delta(request.bucket, on_hand, request.qty_delta)?;

        let scope = PostingScope::open(request.bucket);
        let entry = LedgerEntry::record(LedgerEntryId::new(), Utc::now(), request);
        match self.ledger.append(&scope, entry)? {
            Appended::Existing(existing) => Ok(replay(&existing, request)?),
            Appended::New(id) => {
                guard.write_on_hand(&scope, next)?;
                debug!(entry_id = %id, on_hand = %next, "posted");
                Ok(id)
            }
        }
    }
}
