//! Thread-safe in-memory inventory engine.
//!
//! Every public operation is one atomic unit: all checks run before the first
//! write, and the writes that follow cannot fail, so a rejected call leaves no
//! trace. Operations that touch stock hold the bucket lock for their whole
//! duration; see [`crate::store`] for the lock order.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, instrument};

use stockledger_core::{
    BucketKey, DomainError, DomainResult, Entity, LedgerEntryId, LotId, PickItemId, PicklistId,
    ProductId, PurchaseOrderId, PurchaseOrderLineId, Quantity, ReservationId, SalesOrderId,
    SalesOrderLineId, ShipmentId, ShipmentItemId, UserId, WarehouseId,
};
use stockledger_inventory::{
    IdempotencyKey, InventoryReason, PickItem, PickItemStatus, Picklist, PostingRequest,
    Reference, Reservation, ReservationContext, ReservationStatus, RunningEntry,
    check_reservation, open_demand, open_reserved_on_line, running_balances,
};
use stockledger_products::{Product, UnitConversion};
use stockledger_purchasing::{PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};
use stockledger_sales::{
    SalesOrder, SalesOrderLine, SalesOrderStatus, Shipment, ShipmentItem, qty_to_reserve,
};

use crate::config::EngineConfig;
use crate::error::{LogRejection, StoreResult};
use crate::posting::LedgerPoster;
use crate::recompute::{self, SalesDetails};
use crate::store::{BalanceStore, BucketGuard, Documents, LedgerTable, Rows};

#[derive(Debug, Default)]
pub struct InventoryEngine {
    config: EngineConfig,
    balances: BalanceStore,
    ledger: LedgerTable,
    docs: Documents,
}

impl InventoryEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            balances: BalanceStore::new(),
            ledger: LedgerTable::new(),
            docs: Documents::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_timeout(&self) -> Duration {
        self.config.lock_timeout()
    }

    fn lock(&self, bucket: BucketKey) -> StoreResult<BucketGuard> {
        self.balances.lock(bucket, self.lock_timeout())
    }

    fn poster(&self) -> LedgerPoster<'_> {
        LedgerPoster::new(&self.balances, &self.ledger, self.lock_timeout())
    }

    fn run<T>(&self, operation: &'static str, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        f().log_rejection(operation)
    }

    // ----- master data -----

    #[instrument(skip(self, product), fields(product_id = %product.id(), sku = product.sku()))]
    pub fn register_product(&self, product: Product) -> StoreResult<ProductId> {
        self.run("register_product", || {
            let id = product.id();
            self.docs.products.write().insert(product)?;
            Ok(id)
        })
    }

    #[instrument(skip(self))]
    pub fn register_conversion(&self, conversion: UnitConversion) -> StoreResult<()> {
        self.run("register_conversion", || {
            self.docs.conversions.write().register(conversion)?;
            Ok(())
        })
    }

    #[instrument(skip(self, order, lines), fields(order_id = %order.id(), lines = lines.len()))]
    pub fn insert_purchase_order(
        &self,
        order: PurchaseOrder,
        lines: Vec<PurchaseOrderLine>,
    ) -> StoreResult<PurchaseOrderId> {
        self.run("insert_purchase_order", || {
            let mut stored_lines = self.docs.purchase_order_lines.write();
            let mut orders = self.docs.purchase_orders.write();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();

            let order_id = order.id();
            if orders.get(order_id).is_some() {
                return Err(DomainError::conflict(format!("purchase order {order_id} already exists")).into());
            }
            let mut ids = HashSet::new();
            let mut numbers = HashSet::new();
            for line in &lines {
                if line.order_id() != order_id {
                    return Err(DomainError::validation(format!(
                        "line {} belongs to purchase order {}",
                        line.line_no(),
                        line.order_id()
                    ))
                    .into());
                }
                if !numbers.insert(line.line_no()) {
                    return Err(DomainError::validation(format!("duplicate line number {}", line.line_no())).into());
                }
                if !ids.insert(line.id()) || stored_lines.get(line.id()).is_some() {
                    return Err(DomainError::conflict(format!("purchase order line {} already exists", line.id())).into());
                }
                let product = products.live(line.product_id())?;
                conversions.convert(line.qty_ordered(), line.unit_id(), product.base_unit())?;
            }

            orders.insert(order)?;
            for line in lines {
                stored_lines.insert(line)?;
            }
            Ok(order_id)
        })
    }

    #[instrument(skip(self, order, lines), fields(order_id = %order.id(), lines = lines.len()))]
    pub fn insert_sales_order(
        &self,
        order: SalesOrder,
        lines: Vec<SalesOrderLine>,
    ) -> StoreResult<SalesOrderId> {
        self.run("insert_sales_order", || {
            let mut stored_lines = self.docs.sales_order_lines.write();
            let mut orders = self.docs.sales_orders.write();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();

            let order_id = order.id();
            if orders.get(order_id).is_some() {
                return Err(DomainError::conflict(format!("sales order {order_id} already exists")).into());
            }
            let mut ids = HashSet::new();
            let mut numbers = HashSet::new();
            for line in &lines {
                if line.order_id() != order_id {
                    return Err(DomainError::validation(format!(
                        "line {} belongs to sales order {}",
                        line.line_no(),
                        line.order_id()
                    ))
                    .into());
                }
                if !numbers.insert(line.line_no()) {
                    return Err(DomainError::validation(format!("duplicate line number {}", line.line_no())).into());
                }
                if !ids.insert(line.id()) || stored_lines.get(line.id()).is_some() {
                    return Err(DomainError::conflict(format!("sales order line {} already exists", line.id())).into());
                }
                line.ordered_in_base(products.live(line.product_id())?, &conversions)?;
            }

            orders.insert(order)?;
            for line in lines {
                stored_lines.insert(line)?;
            }
            Ok(order_id)
        })
    }

    #[instrument(skip(self, shipment), fields(shipment_id = %shipment.id(), order_id = %shipment.sales_order_id()))]
    pub fn insert_shipment(&self, shipment: Shipment) -> StoreResult<ShipmentId> {
        self.run("insert_shipment", || {
            let orders = self.docs.sales_orders.read();
            let mut shipments = self.docs.shipments.write();
            orders.live(shipment.sales_order_id())?.ensure_open()?;
            let id = shipment.id();
            shipments.insert(shipment)?;
            Ok(id)
        })
    }

    // ----- header lifecycle -----

    #[instrument(skip(self))]
    pub fn approve_purchase_order(&self, order_id: PurchaseOrderId, actor: UserId) -> StoreResult<()> {
        self.run("approve_purchase_order", || {
            let lines = self.docs.purchase_order_lines.read();
            let mut orders = self.docs.purchase_orders.write();
            let live = lines.filter(|l| l.order_id() == order_id && !l.is_deleted()).count();
            orders.live_mut(order_id)?.approve(live)?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn cancel_purchase_order(&self, order_id: PurchaseOrderId, actor: UserId) -> StoreResult<()> {
        self.run("cancel_purchase_order", || {
            self.docs.purchase_orders.write().live_mut(order_id)?.cancel()?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn approve_sales_order(&self, order_id: SalesOrderId, actor: UserId) -> StoreResult<()> {
        self.run("approve_sales_order", || {
            let lines = self.docs.sales_order_lines.read();
            let mut orders = self.docs.sales_orders.write();
            let live = lines.filter(|l| l.order_id() == order_id && !l.is_deleted()).count();
            orders.live_mut(order_id)?.approve(live)?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn cancel_sales_order(&self, order_id: SalesOrderId, actor: UserId) -> StoreResult<()> {
        self.run("cancel_sales_order", || {
            self.docs.sales_orders.write().live_mut(order_id)?.cancel()?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn start_picklist(&self, picklist_id: PicklistId, actor: UserId) -> StoreResult<()> {
        self.run("start_picklist", || {
            self.docs.picklists.write().live_mut(picklist_id)?.start()?;
            Ok(())
        })
    }

    // ----- ledger -----

    /// Post one stock movement. See [`LedgerPoster`].
    pub fn post(&self, request: &PostingRequest) -> StoreResult<LedgerEntryId> {
        self.poster().post(request)
    }

    /// On-hand of a bucket; zero for a bucket that has never been posted to.
    #[instrument(skip(self), fields(%bucket))]
    pub fn balance(&self, bucket: BucketKey) -> StoreResult<Quantity> {
        self.run("balance", || {
            if !self.balances.contains(bucket) {
                return Ok(Quantity::ZERO);
            }
            Ok(self.lock(bucket)?.on_hand())
        })
    }

    #[instrument(skip(self))]
    pub fn balances_for_product(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> StoreResult<Vec<(BucketKey, Quantity)>> {
        self.run("balances_for_product", || {
            self.balances
                .buckets_for_product(warehouse_id, product_id)
                .into_iter()
                .map(|bucket| -> StoreResult<_> { Ok((bucket, self.lock(bucket)?.on_hand())) })
                .collect()
        })
    }

    /// Entries of a bucket in posting order, each with the balance right after it.
    #[instrument(skip(self), fields(%bucket))]
    pub fn ledger_history(&self, bucket: BucketKey) -> StoreResult<Vec<RunningEntry>> {
        self.run("ledger_history", || {
            if !self.balances.contains(bucket) {
                return Ok(Vec::new());
            }
            let _guard = self.lock(bucket)?;
            Ok(running_balances(self.ledger.entries_for(bucket)))
        })
    }

    /// On-hand minus open reservation demand, floored at zero.
    #[instrument(skip(self), fields(%bucket))]
    pub fn available_quantity(&self, bucket: BucketKey) -> StoreResult<Quantity> {
        self.run("available_quantity", || {
            if !self.balances.contains(bucket) {
                return Ok(Quantity::ZERO);
            }
            let guard = self.lock(bucket)?;
            let reservations = self.docs.reservations.read();
            let demand = open_demand(bucket, reservations.iter(), None);
            Ok((guard.on_hand() - demand).clamp_non_negative())
        })
    }

    // ----- reservations -----

    #[instrument(skip(self), fields(%line_id, %bucket, %qty, %actor))]
    pub fn create_reservation(
        &self,
        line_id: SalesOrderLineId,
        bucket: BucketKey,
        qty: Quantity,
        actor: UserId,
    ) -> StoreResult<ReservationId> {
        self.run("create_reservation", || {
            let guard = self.lock(bucket)?;
            let mut reservations = self.docs.reservations.write();
            {
                let lines = self.docs.sales_order_lines.read();
                let orders = self.docs.sales_orders.read();
                let line = lines.live(line_id)?;
                orders.live(line.order_id())?.ensure_open()?;
            }
            if reservations
                .iter()
                .any(|r| !r.is_deleted() && r.order_line_id() == line_id && r.bucket() == bucket)
            {
                return Err(DomainError::conflict(format!(
                    "line {line_id} already has a reservation on {bucket}"
                ))
                .into());
            }

            let candidate = Reservation::new(ReservationId::new(), line_id, bucket, qty, actor)?;
            self.guard_reservation(&candidate, None, &reservations, guard.on_hand())?;
            let id = candidate.id();
            reservations.insert(candidate)?;
            debug!(reservation_id = %id, "reservation created");
            Ok(id)
        })
    }

    #[instrument(skip(self), fields(%reservation_id, %qty_picked, %actor))]
    pub fn update_reservation_picked(
        &self,
        reservation_id: ReservationId,
        qty_picked: Quantity,
        actor: UserId,
    ) -> StoreResult<()> {
        self.run("update_reservation_picked", || {
            let bucket = self.docs.reservations.live(reservation_id)?.bucket();
            let guard = self.lock(bucket)?;
            let mut reservations = self.docs.reservations.write();
            let stored = reservations.live(reservation_id)?.clone();
            let candidate = stored.with_picked(qty_picked)?;
            self.guard_reservation(&candidate, Some(&stored), &reservations, guard.on_hand())?;
            reservations.put(candidate)?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn release_reservation(&self, reservation_id: ReservationId, actor: UserId) -> StoreResult<()> {
        self.run("release_reservation", || {
            self.close_reservation(reservation_id, Reservation::release)
        })
    }

    #[instrument(skip(self))]
    pub fn cancel_reservation(&self, reservation_id: ReservationId, actor: UserId) -> StoreResult<()> {
        self.run("cancel_reservation", || {
            self.close_reservation(reservation_id, Reservation::cancel)
        })
    }

    /// Soft delete. The row then drops out of every guard sum.
    #[instrument(skip(self))]
    pub fn delete_reservation(&self, reservation_id: ReservationId, actor: UserId) -> StoreResult<()> {
        self.run("delete_reservation", || {
            self.close_reservation(reservation_id, |r| {
                r.mark_deleted();
                Ok(())
            })
        })
    }

    fn close_reservation(
        &self,
        reservation_id: ReservationId,
        close: impl FnOnce(&mut Reservation) -> DomainResult<()>,
    ) -> StoreResult<()> {
        let bucket = self.docs.reservations.live(reservation_id)?.bucket();
        let _guard = self.lock(bucket)?;
        let mut reservations = self.docs.reservations.write();
        close(reservations.live_mut(reservation_id)?)?;
        Ok(())
    }

    /// Ordered (base unit) minus open reserved, floored at zero.
    #[instrument(skip(self))]
    pub fn quantity_to_reserve(&self, line_id: SalesOrderLineId) -> StoreResult<Quantity> {
        self.run("quantity_to_reserve", || {
            let reservations = self.docs.reservations.read();
            let lines = self.docs.sales_order_lines.read();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();
            let line = lines.live(line_id)?;
            let ordered = line.ordered_in_base(products.live(line.product_id())?, &conversions)?;
            Ok(qty_to_reserve(ordered, open_reserved_on_line(line_id, reservations.iter())))
        })
    }

    /// Run the reservation guard against live state. The caller holds the
    /// candidate's bucket lock and the reservations write lock.
    fn guard_reservation(
        &self,
        candidate: &Reservation,
        previous: Option<&Reservation>,
        reservations: &Rows<Reservation>,
        on_hand: Quantity,
    ) -> DomainResult<()> {
        let lines = self.docs.sales_order_lines.read();
        let products = self.docs.products.read();
        let conversions = self.docs.conversions.read();

        let line = lines.live(candidate.order_line_id())?;
        let product = products
            .get(line.product_id())
            .ok_or_else(|| DomainError::not_found("product", line.product_id()))?;
        let line_reservations: Vec<Reservation> = reservations
            .filter(|r| r.order_line_id() == candidate.order_line_id())
            .cloned()
            .collect();
        let bucket_reservations: Vec<Reservation> = reservations
            .filter(|r| r.bucket() == candidate.bucket())
            .cloned()
            .collect();

        check_reservation(
            candidate,
            previous,
            &ReservationContext {
                line,
                product,
                conversions: &conversions,
                line_reservations: &line_reservations,
                on_hand,
                bucket_reservations: &bucket_reservations,
            },
        )
    }

    // ----- receiving -----

    /// Receive `qty` (line unit) of a purchase order line into `bucket`.
    #[instrument(skip(self), fields(%line_id, %bucket, %qty, %actor))]
    pub fn receive_purchase_order_line(
        &self,
        line_id: PurchaseOrderLineId,
        bucket: BucketKey,
        qty: Quantity,
        actor: UserId,
    ) -> StoreResult<LedgerEntryId> {
        self.run("receive_purchase_order_line", || {
            let mut guard = self.lock(bucket)?;
            let mut lines = self.docs.purchase_order_lines.write();
            let mut orders = self.docs.purchase_orders.write();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();

            let line = lines.live(line_id)?.clone();
            orders.live(line.order_id())?.ensure_receivable()?;
            if bucket.product_id() != line.product_id() {
                return Err(DomainError::validation(format!(
                    "bucket product {} does not match line product {}",
                    bucket.product_id(),
                    line.product_id()
                ))
                .into());
            }
            line.check_receipt(qty)?;
            let product = products.live(line.product_id())?;
            let base_qty = conversions.convert(qty, line.unit_id(), product.base_unit())?;

            let request = PostingRequest::new(
                bucket,
                base_qty,
                InventoryReason::Receive,
                Reference::to("purchase_order_line", line_id),
                actor,
            );
            let entry_id = self.poster().post_locked(&mut guard, &request)?;

            lines.live_mut(line_id)?.receive(qty)?;
            let status = recompute::purchase_order(&mut orders, &lines, line.order_id())?;
            debug!(%entry_id, status = status.as_str(), "line received");
            Ok(entry_id)
        })
    }

    // ----- picking -----

    #[instrument(skip(self))]
    pub fn create_picklist_for_order(
        &self,
        order_id: SalesOrderId,
        warehouse_id: WarehouseId,
        actor: UserId,
    ) -> StoreResult<PicklistId> {
        self.run("create_picklist_for_order", || {
            let reservations = self.docs.reservations.read();
            let mut items = self.docs.pick_items.write();
            let mut picklists = self.docs.picklists.write();
            let lines = self.docs.sales_order_lines.read();
            let orders = self.docs.sales_orders.read();

            orders.live(order_id)?.ensure_open()?;
            let line_ids: HashSet<SalesOrderLineId> = lines
                .filter(|l| l.order_id() == order_id && !l.is_deleted())
                .map(Entity::id)
                .collect();

            let list = Picklist::new(PicklistId::new(), order_id, warehouse_id, actor);
            let mut new_items = Vec::new();
            for reservation in reservations.filter(|r| {
                !r.is_deleted()
                    && r.status() == ReservationStatus::Open
                    && r.bucket().warehouse_id() == warehouse_id
                    && line_ids.contains(&r.order_line_id())
            }) {
                let pending: Quantity = items
                    .filter(|i| {
                        !i.is_deleted()
                            && i.status() == PickItemStatus::Open
                            && i.reservation_id() == reservation.id()
                    })
                    .map(|i| i.qty_to_pick() - i.qty_picked())
                    .sum();
                let to_pick = reservation.open_qty() - pending;
                if to_pick.is_positive() {
                    new_items.push(PickItem::new(
                        PickItemId::new(),
                        list.id(),
                        reservation.id(),
                        reservation.bucket(),
                        to_pick,
                    )?);
                }
            }
            if new_items.is_empty() {
                return Err(DomainError::validation(format!(
                    "sales order {order_id} has nothing left to pick in warehouse {warehouse_id}"
                ))
                .into());
            }

            let picklist_id = list.id();
            picklists.insert(list)?;
            for item in new_items {
                items.insert(item)?;
            }
            Ok(picklist_id)
        })
    }

    /// Pick `qty` (base unit) for a pick item: advances the item and its
    /// reservation and issues the stock with an `ISSUE_PICK` posting.
    #[instrument(skip(self), fields(%item_id, %qty, %actor))]
    pub fn confirm_pick(
        &self,
        item_id: PickItemId,
        qty: Quantity,
        actor: UserId,
    ) -> StoreResult<LedgerEntryId> {
        self.run("confirm_pick", || {
            let bucket = self.docs.pick_items.live(item_id)?.bucket();
            let mut guard = self.lock(bucket)?;
            let mut reservations = self.docs.reservations.write();
            let mut items = self.docs.pick_items.write();
            let mut picklists = self.docs.picklists.write();

            let item = items.live(item_id)?.clone();
            let next_item = item.confirm(qty)?;
            let stored = reservations.live(item.reservation_id())?.clone();
            let next_reservation = stored.with_picked(stored.qty_picked().checked_add(qty)?)?;
            self.guard_reservation(&next_reservation, Some(&stored), &reservations, guard.on_hand())?;

            let key = IdempotencyKey::new(format!("pick:{item_id}:{}", next_item.qty_picked()))?;
            let request = PostingRequest::new(
                bucket,
                -qty,
                InventoryReason::IssuePick,
                Reference::to("pick_item", item_id),
                actor,
            )
            .with_idempotency_key(key);
            let entry_id = self.poster().post_locked(&mut guard, &request)?;

            reservations.put(next_reservation)?;
            items.put(next_item)?;
            recompute::picklist(&mut picklists, &items, item.picklist_id())?;
            Ok(entry_id)
        })
    }

    #[instrument(skip(self))]
    pub fn short_pick(&self, item_id: PickItemId, actor: UserId) -> StoreResult<()> {
        self.run("short_pick", || {
            let mut items = self.docs.pick_items.write();
            let mut picklists = self.docs.picklists.write();
            let item = items.live_mut(item_id)?;
            item.short()?;
            let picklist_id = item.picklist_id();
            recompute::picklist(&mut picklists, &items, picklist_id)?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn delete_pick_item(&self, item_id: PickItemId, actor: UserId) -> StoreResult<()> {
        self.run("delete_pick_item", || {
            let mut items = self.docs.pick_items.write();
            let mut picklists = self.docs.picklists.write();
            let item = items.live_mut(item_id)?;
            item.mark_deleted();
            let picklist_id = item.picklist_id();
            recompute::picklist(&mut picklists, &items, picklist_id)?;
            Ok(())
        })
    }

    // ----- shipping -----

    /// One shipment item per picked, not yet shipped reservation of the order.
    #[instrument(skip(self))]
    pub fn add_shipment_from_picks(
        &self,
        shipment_id: ShipmentId,
        actor: UserId,
    ) -> StoreResult<Vec<ShipmentItemId>> {
        self.run("add_shipment_from_picks", || {
            let reservations = self.docs.reservations.read();
            let lines = self.docs.sales_order_lines.read();
            let mut orders = self.docs.sales_orders.write();
            let shipments = self.docs.shipments.read();
            let mut items = self.docs.shipment_items.write();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();

            let shipment = shipments.live(shipment_id)?.clone();
            let order_id = shipment.sales_order_id();
            orders.live(order_id)?.ensure_open()?;

            let line_ids: HashSet<SalesOrderLineId> = lines
                .filter(|l| l.order_id() == order_id && !l.is_deleted())
                .map(Entity::id)
                .collect();
            let shipped: HashSet<ReservationId> = items
                .filter(|i| !i.is_deleted())
                .filter_map(ShipmentItem::reservation_id)
                .collect();

            let mut new_items = Vec::new();
            for r in reservations.filter(|r| {
                !r.is_deleted()
                    && r.status() == ReservationStatus::Picked
                    && r.bucket().warehouse_id() == shipment.warehouse_id()
                    && line_ids.contains(&r.order_line_id())
                    && !shipped.contains(&r.id())
            }) {
                let bucket = r.bucket();
                new_items.push(
                    ShipmentItem::new(
                        ShipmentItemId::new(),
                        shipment_id,
                        bucket.product_id(),
                        bucket.lot_id(),
                        r.qty_picked(),
                    )?
                    .from_reservation(r.id()),
                );
            }

            SalesDetails {
                lines: &lines,
                shipments: &shipments,
                shipment_items: &items,
                products: &products,
                conversions: &conversions,
            }
            .ordered(order_id)?;

            let ids: Vec<ShipmentItemId> = new_items.iter().map(Entity::id).collect();
            for item in new_items {
                items.insert(item)?;
            }
            SalesDetails {
                lines: &lines,
                shipments: &shipments,
                shipment_items: &items,
                products: &products,
                conversions: &conversions,
            }
            .recompute(&mut orders, order_id)?;
            Ok(ids)
        })
    }

    /// Record `qty` (base unit) of a product on a shipment.
    #[instrument(skip(self), fields(%shipment_id, %product_id, %qty, %actor))]
    pub fn add_shipment_item(
        &self,
        shipment_id: ShipmentId,
        product_id: ProductId,
        lot_id: Option<LotId>,
        qty: Quantity,
        actor: UserId,
    ) -> StoreResult<ShipmentItemId> {
        self.run("add_shipment_item", || {
            let lines = self.docs.sales_order_lines.read();
            let mut orders = self.docs.sales_orders.write();
            let shipments = self.docs.shipments.read();
            let mut items = self.docs.shipment_items.write();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();

            let order_id = shipments.live(shipment_id)?.sales_order_id();
            orders.live(order_id)?.ensure_open()?;
            products.live(product_id)?;
            if !lines
                .iter()
                .any(|l| l.order_id() == order_id && !l.is_deleted() && l.product_id() == product_id)
            {
                return Err(DomainError::validation(format!(
                    "product {product_id} is not on sales order {order_id}"
                ))
                .into());
            }
            let item = ShipmentItem::new(ShipmentItemId::new(), shipment_id, product_id, lot_id, qty)?;
            let id = item.id();

            SalesDetails {
                lines: &lines,
                shipments: &shipments,
                shipment_items: &items,
                products: &products,
                conversions: &conversions,
            }
            .ordered(order_id)?;

            items.insert(item)?;
            SalesDetails {
                lines: &lines,
                shipments: &shipments,
                shipment_items: &items,
                products: &products,
                conversions: &conversions,
            }
            .recompute(&mut orders, order_id)?;
            Ok(id)
        })
    }

    #[instrument(skip(self))]
    pub fn delete_shipment_item(&self, item_id: ShipmentItemId, actor: UserId) -> StoreResult<()> {
        self.run("delete_shipment_item", || {
            let lines = self.docs.sales_order_lines.read();
            let mut orders = self.docs.sales_orders.write();
            let shipments = self.docs.shipments.read();
            let mut items = self.docs.shipment_items.write();
            let products = self.docs.products.read();
            let conversions = self.docs.conversions.read();

            let shipment_id = items.live(item_id)?.shipment_id();
            let order_id = shipments.live(shipment_id)?.sales_order_id();
            items.live_mut(item_id)?.mark_deleted();
            SalesDetails {
                lines: &lines,
                shipments: &shipments,
                shipment_items: &items,
                products: &products,
                conversions: &conversions,
            }
            .recompute(&mut orders, order_id)?;
            Ok(())
        })
    }

    // ----- reads -----

    pub fn reservation(&self, id: ReservationId) -> StoreResult<Reservation> {
        Ok(self.docs.reservations.live(id)?)
    }

    pub fn purchase_order_status(&self, id: PurchaseOrderId) -> StoreResult<PurchaseOrderStatus> {
        Ok(self.docs.purchase_orders.live(id)?.status())
    }

    pub fn purchase_order_line(&self, id: PurchaseOrderLineId) -> StoreResult<PurchaseOrderLine> {
        Ok(self.docs.purchase_order_lines.live(id)?)
    }

    pub fn sales_order_status(&self, id: SalesOrderId) -> StoreResult<SalesOrderStatus> {
        Ok(self.docs.sales_orders.live(id)?.status())
    }

    pub fn picklist(&self, id: PicklistId) -> StoreResult<Picklist> {
        Ok(self.docs.picklists.live(id)?)
    }

    pub fn pick_items(&self, picklist_id: PicklistId) -> Vec<PickItem> {
        self.docs
            .pick_items
            .read()
            .filter(|i| i.picklist_id() == picklist_id && !i.is_deleted())
            .cloned()
            .collect()
    }

    pub fn shipment_items(&self, shipment_id: ShipmentId) -> Vec<ShipmentItem> {
        self.docs
            .shipment_items
            .read()
            .filter(|i| i.shipment_id() == shipment_id && !i.is_deleted())
            .cloned()
            .collect()
    }
}
