use std::collections::BTreeMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockledger_core::{DomainError, DomainResult, Entity};

/// Rows of one document table, keyed by id.
///
/// Ids are UUID v7, so key order is creation order.
#[derive(Debug)]
pub struct Rows<E: Entity> {
    entity: &'static str,
    rows: BTreeMap<E::Id, E>,
}

impl<E> Rows<E>
where
    E: Entity + Clone,
    E::Id: Ord + core::fmt::Display,
{
    pub fn get(&self, id: E::Id) -> Option<&E> {
        self.rows.get(&id)
    }

    /// Row that exists and is not soft-deleted.
    pub fn live(&self, id: E::Id) -> DomainResult<&E> {
        match self.rows.get(&id) {
            Some(row) if !row.is_deleted() => Ok(row),
            _ => Err(DomainError::not_found(self.entity, id)),
        }
    }

    pub fn insert(&mut self, row: E) -> DomainResult<()> {
        let id = row.id();
        if self.rows.contains_key(&id) {
            return Err(DomainError::conflict(format!("{} {id} already exists", self.entity)));
        }
        self.rows.insert(id, row);
        Ok(())
    }

    /// Replace an existing row.
    pub fn put(&mut self, row: E) -> DomainResult<()> {
        let id = row.id();
        match self.rows.get_mut(&id) {
            Some(slot) => {
                *slot = row;
                Ok(())
            }
            None => Err(DomainError::not_found(self.entity, id)),
        }
    }

    /// Mutable access to a live row.
    pub fn live_mut(&mut self, id: E::Id) -> DomainResult<&mut E> {
        match self.rows.get_mut(&id) {
            Some(row) if !row.is_deleted() => Ok(row),
            _ => Err(DomainError::not_found(self.entity, id)),
        }
    }

    /// All rows, soft-deleted ones included.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.rows.values()
    }

    pub fn filter<'a>(&'a self, pred: impl Fn(&E) -> bool + 'a) -> impl Iterator<Item = &'a E> {
        self.rows.values().filter(move |row| pred(row))
    }
}

/// In-memory document table behind a read/write lock.
#[derive(Debug)]
pub struct Table<E: Entity> {
    rows: RwLock<Rows<E>>,
}

impl<E> Table<E>
where
    E: Entity + Clone,
    E::Id: Ord + core::fmt::Display,
{
    pub fn new(entity: &'static str) -> Self {
        Self {
            rows: RwLock::new(Rows {
                entity,
                rows: BTreeMap::new(),
            }),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Rows<E>> {
        self.rows.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Rows<E>> {
        self.rows.write()
    }

    /// Clone of a live row.
    pub fn live(&self, id: E::Id) -> DomainResult<E> {
        self.rows.read().live(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{ProductId, UnitId, UserId};
    use stockledger_products::Product;

    fn product() -> Product {
        Product::new(ProductId::new(), "SKU", "Thing", UnitId::new(), UserId::new()).unwrap()
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let table: Table<Product> = Table::new("product");
        let row = product();
        table.write().insert(row.clone()).unwrap();
        assert!(matches!(table.write().insert(row), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn deleted_rows_are_not_live() {
        let table: Table<Product> = Table::new("product");
        let mut row = product();
        let id = row.id();
        table.write().insert(row.clone()).unwrap();
        row.mark_deleted();
        table.write().put(row).unwrap();

        assert!(table.read().get(id).is_some());
        assert_eq!(
            table.live(id).unwrap_err(),
            DomainError::not_found("product", id)
        );
    }
}
