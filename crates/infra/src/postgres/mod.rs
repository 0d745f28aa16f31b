//! PostgreSQL backend.
//!
//! Same semantics as the in-memory engine, with the database as the lock
//! manager: every operation runs in one transaction and locks the bucket row
//! with `SELECT … FOR UPDATE` before it reads anything it decides on. The pure
//! domain checks (`apply_delta`, `check_reservation`, the status derivations)
//! are the ones the in-memory engine uses.
//!
//! Balance, ledger and reservation writes additionally pass the database-side
//! write-path guard: triggers reject them unless the transaction has raised the
//! matching `stockledger.allow_*` flag. Only `post_locked` raises the balance
//! and ledger flags; only the two guarded reservation writes raise
//! `allow_reservation_write`.
//!
//! ## Error mapping
//!
//! | SQLSTATE | StoreError |
//! |----------|------------|
//! | `23514` check violation | `Domain(Validation)` |
//! | `23505` unique violation | `Domain(Conflict)` |
//! | `23503` foreign key violation | `Domain(NotFound)` |
//! | `P0001` raised by a guard trigger | `Domain(InvariantViolation)` |
//! | `55P03` lock not available | `LockTimeout` (bucket locks) or `Storage` |
//! | anything else | `Storage` |

mod rows;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockledger_core::{
    BucketKey, DomainError, Entity, LedgerEntryId, PicklistId, ProductId, PurchaseOrderId, Quantity,
    ReservationId, SalesOrderId, SalesOrderLineId, UserId,
};
use stockledger_inventory::{
    IdempotencyKey, LedgerEntry, PickItem, PicklistStatus, PostingRequest, Reservation,
    ReservationContext, RunningEntry, apply_delta, check_reservation, derive_picklist_status,
    replay, running_balances,
};
use stockledger_products::{ConversionTable, Product, UnitConversion};
use stockledger_purchasing::{PurchaseOrderLine, PurchaseOrderStatus, derive_received_status};
use stockledger_sales::{SalesOrderLine, SalesOrderStatus, derive_ship_status};

use crate::config::{DEFAULT_LOCK_TIMEOUT_MS, EngineConfig};
use crate::error::{LogRejection, StoreError, StoreResult};

use rows::{
    ConversionRow, LedgerRow, PickItemRow, ProductRow, PurchaseOrderLineRow, ReservationRow,
    SalesOrderLineRow,
};

const MIGRATION: &str = include_str!("../../../../migrations/0001_inventory_ledger.sql");

const BUCKET_WHERE: &str =
    "warehouse_id = $1 AND bin_id_norm = $2 AND product_id = $3 AND lot_id_norm = $4";

type Tx = Transaction<'static, Postgres>;

#[derive(Debug, Clone)]
pub struct PgInventoryStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub async fn connect(config: &EngineConfig) -> StoreResult<Self> {
        let database = config
            .database
            .as_ref()
            .ok_or_else(|| StoreError::Config("database.url is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .connect(&database.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool).with_lock_timeout(config.lock_timeout()))
    }

    /// Create tables, guard triggers and views. Safe to run repeatedly, and
    /// concurrent callers are serialized on an advisory lock.
    pub async fn migrate(&self) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('stockledger.migrate'))")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        sqlx::raw_sql(MIGRATION)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        commit(tx).await
    }

    async fn begin(&self) -> StoreResult<Tx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(tx)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.lock_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    // ----- ledger -----

    #[instrument(
        skip(self, request),
        fields(
            bucket = %request.bucket,
            qty_delta = %request.qty_delta,
            reason = %request.reason
        )
    )]
    pub async fn post(&self, request: &PostingRequest) -> StoreResult<LedgerEntryId> {
        self.try_post(request).await.log_rejection("post")
    }

    async fn try_post(&self, request: &PostingRequest) -> StoreResult<LedgerEntryId> {
        request.validate()?;
        let mut tx = self.begin().await?;
        let on_hand = lock_bucket(&mut tx, request.bucket, self.timeout_ms()).await?;
        let id = post_locked(&mut tx, request, on_hand).await?;
        commit(tx).await?;
        Ok(id)
    }

    /// On-hand of a bucket; zero when the bucket has no row yet.
    #[instrument(skip(self), fields(%bucket))]
    pub async fn balance(&self, bucket: BucketKey) -> StoreResult<Quantity> {
        let sql = format!("SELECT qty_on_hand FROM inventory_balance WHERE {BUCKET_WHERE}");
        let row = bind_bucket(sqlx::query(&sql), bucket)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("balance", e))?;
        decimal_column(row, "qty_on_hand")
    }

    /// On-hand minus open reservation demand, floored at zero.
    #[instrument(skip(self), fields(%bucket))]
    pub async fn available_quantity(&self, bucket: BucketKey) -> StoreResult<Quantity> {
        let sql = format!("SELECT qty_available FROM v_inventory_available WHERE {BUCKET_WHERE}");
        let row = bind_bucket(sqlx::query(&sql), bucket)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("available_quantity", e))?;
        decimal_column(row, "qty_available")
    }

    #[instrument(skip(self), fields(%bucket))]
    pub async fn ledger_history(&self, bucket: BucketKey) -> StoreResult<Vec<RunningEntry>> {
        let sql = format!("SELECT * FROM inventory_ledger WHERE {BUCKET_WHERE} ORDER BY seq ASC");
        let rows = bind_bucket(sqlx::query(&sql), bucket)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ledger_history", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let row = LedgerRow::from_row(&row).map_err(|e| map_sqlx_error("decode_ledger", e))?;
            entries.push(LedgerEntry::try_from(row)?);
        }
        Ok(running_balances(entries))
    }

    // ----- reservations -----

    #[instrument(skip(self), fields(%line_id, %bucket, %qty, %actor))]
    pub async fn create_reservation(
        &self,
        line_id: SalesOrderLineId,
        bucket: BucketKey,
        qty: Quantity,
        actor: UserId,
    ) -> StoreResult<ReservationId> {
        self.try_create_reservation(line_id, bucket, qty, actor)
            .await
            .log_rejection("create_reservation")
    }

    async fn try_create_reservation(
        &self,
        line_id: SalesOrderLineId,
        bucket: BucketKey,
        qty: Quantity,
        actor: UserId,
    ) -> StoreResult<ReservationId> {
        let mut tx = self.begin().await?;
        let on_hand = lock_bucket(&mut tx, bucket, self.timeout_ms()).await?;
        let line = lock_sales_line(&mut tx, line_id).await?;
        ensure_sales_order_open(&mut tx, line.order_id()).await?;

        let line_reservations = reservations_of_line(&mut tx, line_id).await?;
        if line_reservations
            .iter()
            .any(|r| !r.is_deleted() && r.bucket() == bucket)
        {
            return Err(DomainError::conflict(format!(
                "line {line_id} already has a reservation on {bucket}"
            ))
            .into());
        }

        let candidate = Reservation::new(ReservationId::new(), line_id, bucket, qty, actor)?;
        guard_reservation(&mut tx, &candidate, None, &line, &line_reservations, on_hand).await?;

        set_reservation_write(&mut tx, "1").await?;
        sqlx::query(
            r#"
            INSERT INTO reservation (
                id, so_line_id, warehouse_id, bin_id_norm, product_id, lot_id_norm,
                qty_reserved, qty_picked, status, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::from(candidate.id()))
        .bind(Uuid::from(line_id))
        .bind(Uuid::from(bucket.warehouse_id()))
        .bind(bucket.bin_id_norm())
        .bind(Uuid::from(bucket.product_id()))
        .bind(bucket.lot_id_norm())
        .bind(candidate.qty_reserved().as_decimal())
        .bind(candidate.qty_picked().as_decimal())
        .bind(candidate.status().as_str())
        .bind(Uuid::from(actor))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        set_reservation_write(&mut tx, "0").await?;

        commit(tx).await?;
        debug!(reservation_id = %candidate.id(), "reservation created");
        Ok(candidate.id())
    }

    #[instrument(skip(self), fields(%reservation_id, %qty_picked, %actor))]
    pub async fn update_reservation_picked(
        &self,
        reservation_id: ReservationId,
        qty_picked: Quantity,
        actor: UserId,
    ) -> StoreResult<()> {
        self.try_update_reservation_picked(reservation_id, qty_picked)
            .await
            .log_rejection("update_reservation_picked")
    }

    async fn try_update_reservation_picked(
        &self,
        reservation_id: ReservationId,
        qty_picked: Quantity,
    ) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        let (bucket, line_id) = reservation_location(&mut tx, reservation_id).await?;

        let on_hand = lock_bucket(&mut tx, bucket, self.timeout_ms()).await?;
        let line = lock_sales_line(&mut tx, line_id).await?;
        let line_reservations = reservations_of_line(&mut tx, line_id).await?;
        let stored = line_reservations
            .iter()
            .find(|r| r.id() == reservation_id && !r.is_deleted())
            .cloned()
            .ok_or_else(|| DomainError::not_found("reservation", reservation_id))?;

        let candidate = stored.with_picked(qty_picked)?;
        guard_reservation(&mut tx, &candidate, Some(&stored), &line, &line_reservations, on_hand)
            .await?;

        set_reservation_write(&mut tx, "1").await?;
        sqlx::query("UPDATE reservation SET qty_picked = $2, status = $3 WHERE id = $1")
            .bind(Uuid::from(reservation_id))
            .bind(candidate.qty_picked().as_decimal())
            .bind(candidate.status().as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_reservation", e))?;
        set_reservation_write(&mut tx, "0").await?;

        commit(tx).await
    }

    // ----- derived status -----

    #[instrument(skip(self))]
    pub async fn recompute_purchase_order(
        &self,
        order_id: PurchaseOrderId,
    ) -> StoreResult<PurchaseOrderStatus> {
        let mut tx = self.begin().await?;
        let current = PurchaseOrderStatus::parse(
            &lock_header_status(&mut tx, "purchase_order", "purchase order", order_id.into()).await?,
        )?;

        let rows = sqlx::query("SELECT * FROM purchase_order_line WHERE purchase_order_id = $1")
            .bind(Uuid::from(order_id))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_purchase_order_lines", e))?;
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let row = PurchaseOrderLineRow::from_row(&row)
                .map_err(|e| map_sqlx_error("decode_purchase_order_line", e))?;
            lines.push(PurchaseOrderLine::try_from(row)?);
        }

        let next = derive_received_status(current, lines.iter());
        if next != current {
            store_header_status(&mut tx, "purchase_order", order_id.into(), next.as_str()).await?;
            debug!(%order_id, from = current.as_str(), to = next.as_str(), "purchase order status recomputed");
        }
        commit(tx).await?;
        Ok(next)
    }

    #[instrument(skip(self))]
    pub async fn recompute_sales_order(&self, order_id: SalesOrderId) -> StoreResult<SalesOrderStatus> {
        let mut tx = self.begin().await?;
        let current = SalesOrderStatus::parse(
            &lock_header_status(&mut tx, "sales_order", "sales order", order_id.into()).await?,
        )?;

        let rows = sqlx::query(
            "SELECT * FROM sales_order_line WHERE sales_order_id = $1 AND is_deleted = false",
        )
        .bind(Uuid::from(order_id))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_sales_order_lines", e))?;
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let row = SalesOrderLineRow::from_row(&row)
                .map_err(|e| map_sqlx_error("decode_sales_order_line", e))?;
            lines.push(SalesOrderLine::try_from(row)?);
        }

        let conversions = load_conversions(&mut tx).await?;
        let mut products: HashMap<ProductId, Product> = HashMap::new();
        let mut ordered = Quantity::ZERO;
        for line in &lines {
            if !products.contains_key(&line.product_id()) {
                let product = load_product(&mut tx, line.product_id()).await?;
                products.insert(line.product_id(), product);
            }
            let product = products
                .get(&line.product_id())
                .ok_or_else(|| DomainError::not_found("product", line.product_id()))?;
            ordered = ordered.checked_add(line.ordered_in_base(product, &conversions)?)?;
        }

        let shipped_row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(si.qty_shipped), 0) AS shipped
            FROM shipment_item si
            JOIN shipment s ON s.id = si.shipment_id
            WHERE s.sales_order_id = $1 AND s.is_deleted = false AND si.is_deleted = false
            "#,
        )
        .bind(Uuid::from(order_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("sum_shipped", e))?;
        let shipped = decimal_column(shipped_row, "shipped")?;

        let next = derive_ship_status(current, ordered, shipped);
        if next != current {
            store_header_status(&mut tx, "sales_order", order_id.into(), next.as_str()).await?;
            debug!(%order_id, %ordered, %shipped, from = current.as_str(), to = next.as_str(), "sales order status recomputed");
        }
        commit(tx).await?;
        Ok(next)
    }

    #[instrument(skip(self))]
    pub async fn recompute_picklist(&self, picklist_id: PicklistId) -> StoreResult<PicklistStatus> {
        let mut tx = self.begin().await?;
        let current = PicklistStatus::parse(
            &lock_header_status(&mut tx, "picklist", "picklist", picklist_id.into()).await?,
        )?;

        let rows = sqlx::query("SELECT * FROM pick_item WHERE picklist_id = $1")
            .bind(Uuid::from(picklist_id))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_pick_items", e))?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let row = PickItemRow::from_row(&row).map_err(|e| map_sqlx_error("decode_pick_item", e))?;
            items.push(PickItem::try_from(row)?);
        }

        let next = derive_picklist_status(current, items.iter());
        if next != current {
            store_header_status(&mut tx, "picklist", picklist_id.into(), next.as_str()).await?;
            debug!(%picklist_id, from = current.as_str(), to = next.as_str(), "picklist status recomputed");
        }
        commit(tx).await?;
        Ok(next)
    }
}

async fn commit(tx: Tx) -> StoreResult<()> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

fn bind_bucket<'q>(
    query: Query<'q, Postgres, PgArguments>,
    bucket: BucketKey,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(Uuid::from(bucket.warehouse_id()))
        .bind(bucket.bin_id_norm())
        .bind(Uuid::from(bucket.product_id()))
        .bind(bucket.lot_id_norm())
}

fn decimal_column(row: Option<sqlx::postgres::PgRow>, column: &str) -> StoreResult<Quantity> {
    match row {
        Some(row) => {
            let value: Decimal = row
                .try_get(column)
                .map_err(|e| map_sqlx_error("decode_quantity", e))?;
            Ok(Quantity::new(value))
        }
        None => Ok(Quantity::ZERO),
    }
}

/// Create the bucket row at zero if needed, then lock it and return its on-hand.
async fn lock_bucket(tx: &mut Tx, bucket: BucketKey, timeout_ms: u64) -> StoreResult<Quantity> {
    let lock_error = |e: sqlx::Error| {
        if is_lock_timeout(&e) {
            StoreError::LockTimeout { bucket, timeout_ms }
        } else {
            map_sqlx_error("lock_bucket", e)
        }
    };

    bind_bucket(
        sqlx::query(
            r#"
            INSERT INTO inventory_balance (warehouse_id, bin_id_norm, product_id, lot_id_norm)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        ),
        bucket,
    )
    .execute(&mut **tx)
    .await
    .map_err(&lock_error)?;

    let sql = format!("SELECT qty_on_hand FROM inventory_balance WHERE {BUCKET_WHERE} FOR UPDATE");
    let row = bind_bucket(sqlx::query(&sql), bucket)
        .fetch_one(&mut **tx)
        .await
        .map_err(&lock_error)?;
    decimal_column(Some(row), "qty_on_hand")
}

/// The poster's critical section, run while the transaction holds the bucket row lock.
async fn post_locked(
    tx: &mut Tx,
    request: &PostingRequest,
    on_hand: Quantity,
) -> StoreResult<LedgerEntryId> {
    if let Some(key) = &request.idempotency_key {
        if let Some(existing) = find_by_key(tx, key).await? {
            debug!(entry_id = %existing.id, key = %key, "idempotent replay");
            return Ok(replay(&existing, request)?);
        }
    }

    let next = apply_delta(request.bucket, on_hand, request.qty_delta)?;
    let entry = LedgerEntry::record(LedgerEntryId::new(), Utc::now(), request);

    set_write_flags(tx, "1").await?;
    sqlx::query(
        r#"
        INSERT INTO inventory_ledger (
            id, ts, warehouse_id, bin_id_norm, product_id, lot_id_norm,
            qty_delta, reason, ref_type, ref_id, idempotency_key, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(Uuid::from(entry.id))
    .bind(entry.ts)
    .bind(Uuid::from(entry.bucket.warehouse_id()))
    .bind(entry.bucket.bin_id_norm())
    .bind(Uuid::from(entry.bucket.product_id()))
    .bind(entry.bucket.lot_id_norm())
    .bind(entry.qty_delta.as_decimal())
    .bind(entry.reason.as_str())
    .bind(&entry.reference.ref_type)
    .bind(entry.reference.ref_id)
    .bind(entry.idempotency_key.as_ref().map(|k| k.as_str().to_string()))
    .bind(Uuid::from(entry.actor))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;

    let sql = format!(
        "UPDATE inventory_balance SET qty_on_hand = $5, updated_at = now() WHERE {BUCKET_WHERE}"
    );
    bind_bucket(sqlx::query(&sql), request.bucket)
        .bind(next.as_decimal())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;
    set_write_flags(tx, "0").await?;

    debug!(entry_id = %entry.id, on_hand = %next, "posted");
    Ok(entry.id)
}

async fn set_write_flags(tx: &mut Tx, value: &str) -> StoreResult<()> {
    sqlx::query(
        r#"
        SELECT set_config('stockledger.allow_ledger_insert', $1, true),
               set_config('stockledger.allow_balance_write', $1, true)
        "#,
    )
    .bind(value)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("set_write_flags", e))?;
    Ok(())
}

async fn set_reservation_write(tx: &mut Tx, value: &str) -> StoreResult<()> {
    sqlx::query("SELECT set_config('stockledger.allow_reservation_write', $1, true)")
        .bind(value)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_reservation_write", e))?;
    Ok(())
}

async fn find_by_key(tx: &mut Tx, key: &IdempotencyKey) -> StoreResult<Option<LedgerEntry>> {
    let row = sqlx::query("SELECT * FROM inventory_ledger WHERE idempotency_key = $1")
        .bind(key.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("find_by_key", e))?;
    match row {
        Some(row) => {
            let row = LedgerRow::from_row(&row).map_err(|e| map_sqlx_error("decode_ledger", e))?;
            Ok(Some(LedgerEntry::try_from(row)?))
        }
        None => Ok(None),
    }
}

async fn lock_sales_line(tx: &mut Tx, line_id: SalesOrderLineId) -> StoreResult<SalesOrderLine> {
    let row = sqlx::query("SELECT * FROM sales_order_line WHERE id = $1 FOR UPDATE")
        .bind(Uuid::from(line_id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_sales_order_line", e))?
        .ok_or_else(|| DomainError::not_found("sales order line", line_id))?;
    let row = SalesOrderLineRow::from_row(&row)
        .map_err(|e| map_sqlx_error("decode_sales_order_line", e))?;
    let line = SalesOrderLine::try_from(row)?;
    if line.is_deleted() {
        return Err(DomainError::not_found("sales order line", line_id).into());
    }
    Ok(line)
}

async fn ensure_sales_order_open(tx: &mut Tx, order_id: SalesOrderId) -> StoreResult<()> {
    let row = sqlx::query("SELECT status FROM sales_order WHERE id = $1 AND is_deleted = false")
        .bind(Uuid::from(order_id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_sales_order", e))?
        .ok_or_else(|| DomainError::not_found("sales order", order_id))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("decode_sales_order", e))?;
    if SalesOrderStatus::parse(&status)? == SalesOrderStatus::Cancelled {
        return Err(DomainError::invariant("sales order is cancelled").into());
    }
    Ok(())
}

async fn reservation_location(
    tx: &mut Tx,
    reservation_id: ReservationId,
) -> StoreResult<(BucketKey, SalesOrderLineId)> {
    let row = sqlx::query("SELECT * FROM reservation WHERE id = $1 AND is_deleted = false")
        .bind(Uuid::from(reservation_id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_reservation", e))?
        .ok_or_else(|| DomainError::not_found("reservation", reservation_id))?;
    let row = ReservationRow::from_row(&row).map_err(|e| map_sqlx_error("decode_reservation", e))?;
    Ok((row.bucket, row.so_line_id.into()))
}

async fn reservations_of_line(tx: &mut Tx, line_id: SalesOrderLineId) -> StoreResult<Vec<Reservation>> {
    let rows = sqlx::query("SELECT * FROM reservation WHERE so_line_id = $1")
        .bind(Uuid::from(line_id))
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_line_reservations", e))?;
    decode_reservations(rows)
}

async fn reservations_of_bucket(tx: &mut Tx, bucket: BucketKey) -> StoreResult<Vec<Reservation>> {
    let sql = format!("SELECT * FROM reservation WHERE {BUCKET_WHERE} AND is_deleted = false");
    let rows = bind_bucket(sqlx::query(&sql), bucket)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_bucket_reservations", e))?;
    decode_reservations(rows)
}

fn decode_reservations(rows: Vec<sqlx::postgres::PgRow>) -> StoreResult<Vec<Reservation>> {
    let mut reservations = Vec::with_capacity(rows.len());
    for row in rows {
        let row = ReservationRow::from_row(&row).map_err(|e| map_sqlx_error("decode_reservation", e))?;
        reservations.push(Reservation::try_from(row)?);
    }
    Ok(reservations)
}

async fn load_product(tx: &mut Tx, product_id: ProductId) -> StoreResult<Product> {
    let row = sqlx::query("SELECT * FROM product WHERE id = $1")
        .bind(Uuid::from(product_id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_product", e))?
        .ok_or_else(|| DomainError::not_found("product", product_id))?;
    let row = ProductRow::from_row(&row).map_err(|e| map_sqlx_error("decode_product", e))?;
    Product::try_from(row)
}

async fn load_conversions(tx: &mut Tx) -> StoreResult<ConversionTable> {
    let rows = sqlx::query("SELECT from_unit_id, to_unit_id, factor FROM uom_conversion")
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_conversions", e))?;
    let mut table = ConversionTable::new();
    for row in rows {
        let row = ConversionRow::from_row(&row).map_err(|e| map_sqlx_error("decode_conversion", e))?;
        table.register(UnitConversion::try_from(row)?)?;
    }
    Ok(table)
}

/// Run the reservation guard inside the transaction. The caller holds the
/// bucket row and the sales order line row locks.
async fn guard_reservation(
    tx: &mut Tx,
    candidate: &Reservation,
    previous: Option<&Reservation>,
    line: &SalesOrderLine,
    line_reservations: &[Reservation],
    on_hand: Quantity,
) -> StoreResult<()> {
    let product = load_product(tx, line.product_id()).await?;
    let conversions = load_conversions(tx).await?;
    let bucket_reservations = reservations_of_bucket(tx, candidate.bucket()).await?;
    check_reservation(
        candidate,
        previous,
        &ReservationContext {
            line,
            product: &product,
            conversions: &conversions,
            line_reservations,
            on_hand,
            bucket_reservations: &bucket_reservations,
        },
    )?;
    Ok(())
}

async fn lock_header_status(
    tx: &mut Tx,
    table: &str,
    entity: &'static str,
    id: Uuid,
) -> StoreResult<String> {
    let sql = format!("SELECT status FROM {table} WHERE id = $1 AND is_deleted = false FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_header", e))?
        .ok_or_else(|| DomainError::not_found(entity, id))?;
    row.try_get("status")
        .map_err(|e| map_sqlx_error("decode_header", e))
}

async fn store_header_status(tx: &mut Tx, table: &str, id: Uuid, status: &str) -> StoreResult<()> {
    let sql = format!("UPDATE {table} SET status = $2 WHERE id = $1");
    sqlx::query(&sql)
        .bind(id)
        .bind(status)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("store_header_status", e))?;
    Ok(())
}

fn is_lock_timeout(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03"))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => DomainError::validation(msg).into(),
                Some("23505") => DomainError::conflict(msg).into(),
                Some("23503") => {
                    DomainError::not_found("referenced row", db_err.constraint().unwrap_or("foreign key")).into()
                }
                Some("P0001") => DomainError::invariant(msg).into(),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
