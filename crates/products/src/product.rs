use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, ProductId, UnitId, UserId};

/// Product master record.
///
/// Only what the ledger needs: identity and the base unit of account every
/// balance, ledger delta and reservation quantity is expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    base_unit: UnitId,
    deleted: bool,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        base_unit: UnitId,
        created_by: UserId,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            id,
            sku,
            name,
            base_unit,
            deleted: false,
            created_at: Utc::now(),
            created_by,
        })
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_unit(&self) -> UnitId {
        self.base_unit
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}
