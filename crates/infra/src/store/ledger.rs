//! Append-only ledger table.

use std::collections::HashMap;

use parking_lot::RwLock;

use stockledger_core::{BucketKey, DomainResult, LedgerEntryId};
use stockledger_inventory::{IdempotencyKey, LedgerEntry};

use crate::posting::PostingScope;

#[derive(Debug, Default)]
struct LedgerRows {
    entries: Vec<LedgerEntry>,
    by_key: HashMap<IdempotencyKey, usize>,
    by_bucket: HashMap<BucketKey, Vec<usize>>,
}

/// Result of an append attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Appended {
    New(LedgerEntryId),
    /// The idempotency key is already taken; nothing was written.
    Existing(LedgerEntry),
}

/// Entries are never updated or removed. Idempotency keys are unique.
#[derive(Debug, Default)]
pub struct LedgerTable {
    rows: RwLock<LedgerRows>,
}

impl LedgerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_key(&self, key: &IdempotencyKey) -> Option<LedgerEntry> {
        let rows = self.rows.read();
        rows.by_key.get(key).map(|&idx| rows.entries[idx].clone())
    }

    /// Entries for a bucket in posting order.
    pub fn entries_for(&self, bucket: BucketKey) -> Vec<LedgerEntry> {
        let rows = self.rows.read();
        rows.by_bucket
            .get(&bucket)
            .map(|idxs| idxs.iter().map(|&i| rows.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append inside a posting scope. The key check and the insert happen under
    /// one write lock.
    pub(crate) fn append(&self, scope: &PostingScope, entry: LedgerEntry) -> DomainResult<Appended> {
        let mut rows = self.rows.write();
        if let Some(key) = &entry.idempotency_key {
            if let Some(&idx) = rows.by_key.get(key) {
                return Ok(Appended::Existing(rows.entries[idx].clone()));
            }
        }
        scope.authorize_ledger_append(entry.bucket)?;

        let idx = rows.entries.len();
        let id = entry.id;
        if let Some(key) = &entry.idempotency_key {
            rows.by_key.insert(key.clone(), idx);
        }
        rows.by_bucket.entry(entry.bucket).or_default().push(idx);
        rows.entries.push(entry);
        Ok(Appended::New(id))
    }
}
