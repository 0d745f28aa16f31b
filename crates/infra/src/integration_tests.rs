//! End-to-end tests for the in-memory engine.
//!
//! Tests: master data → reservation / receipt / pick / shipment → derived status
//!
//! Verifies:
//! - Postings never drive a bucket negative, under contention too
//! - Reservation limits hold per order line and per bucket
//! - Header statuses follow their detail rows

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use stockledger_core::{
        BinId, BucketKey, ConversionFactor, DomainError, Entity, LotId, ProductId, PurchaseOrderId,
        PurchaseOrderLineId, Quantity, SalesOrderId, SalesOrderLineId, ShipmentId, UnitId, UserId,
        WarehouseId,
    };
    use stockledger_inventory::{
        IdempotencyKey, InventoryReason, PickItemStatus, PicklistStatus, PostingRequest, Reference,
        ReservationStatus,
    };
    use stockledger_products::{Product, UnitConversion};
    use stockledger_purchasing::{PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};
    use stockledger_sales::{SalesOrder, SalesOrderLine, SalesOrderStatus, Shipment};

    use crate::config::EngineConfig;
    use crate::engine::InventoryEngine;
    use crate::error::StoreError;
    use crate::posting::LedgerPoster;
    use crate::store::{BalanceStore, LedgerTable};

    struct Fixture {
        engine: InventoryEngine,
        actor: UserId,
        warehouse: WarehouseId,
        each: UnitId,
        product: ProductId,
    }

    fn setup() -> Fixture {
        stockledger_observability::init_for_tests();
        let engine = InventoryEngine::new(EngineConfig::default().with_lock_timeout(Duration::from_secs(2)));
        let actor = UserId::new();
        let each = UnitId::new();
        let product = engine
            .register_product(Product::new(ProductId::new(), "SKU-1", "Widget", each, actor).unwrap())
            .unwrap();
        Fixture {
            engine,
            actor,
            warehouse: WarehouseId::new(),
            each,
            product,
        }
    }

    impl Fixture {
        fn bucket(&self) -> BucketKey {
            BucketKey::new(self.warehouse, None, self.product, None)
        }

        fn bin(&self) -> BucketKey {
            BucketKey::new(self.warehouse, Some(BinId::new()), self.product, None)
        }

        fn request(&self, bucket: BucketKey, qty: i64) -> PostingRequest {
            let reason = if qty >= 0 {
                InventoryReason::AdjustPos
            } else {
                InventoryReason::AdjustNeg
            };
            PostingRequest::new(
                bucket,
                Quantity::units(qty),
                reason,
                Reference::manual(),
                self.actor,
            )
        }

        fn stock(&self, bucket: BucketKey, qty: i64) {
            self.engine.post(&self.request(bucket, qty)).unwrap();
        }

        fn sales_order(&self, quantities: &[i64]) -> (SalesOrderId, Vec<SalesOrderLineId>) {
            self.sales_order_in(self.each, quantities)
        }

        fn sales_order_in(&self, unit: UnitId, quantities: &[i64]) -> (SalesOrderId, Vec<SalesOrderLineId>) {
            let order = SalesOrder::new(SalesOrderId::new(), self.actor);
            let order_id = order.id();
            let lines: Vec<SalesOrderLine> = quantities
                .iter()
                .zip(1u32..)
                .map(|(qty, line_no)| {
                    SalesOrderLine::new(
                        SalesOrderLineId::new(),
                        order_id,
                        line_no,
                        self.product,
                        unit,
                        Quantity::units(*qty),
                    )
                    .unwrap()
                })
                .collect();
            let ids = lines.iter().map(|l| l.id()).collect();
            self.engine.insert_sales_order(order, lines).unwrap();
            self.engine.approve_sales_order(order_id, self.actor).unwrap();
            (order_id, ids)
        }

        fn purchase_order(&self, quantities: &[i64]) -> (PurchaseOrderId, Vec<PurchaseOrderLineId>) {
            self.purchase_order_in(self.each, quantities)
        }

        fn purchase_order_in(
            &self,
            unit: UnitId,
            quantities: &[i64],
        ) -> (PurchaseOrderId, Vec<PurchaseOrderLineId>) {
            let order = PurchaseOrder::new(PurchaseOrderId::new(), self.actor);
            let order_id = order.id();
            let lines: Vec<PurchaseOrderLine> = quantities
                .iter()
                .zip(1u32..)
                .map(|(qty, line_no)| {
                    PurchaseOrderLine::new(
                        PurchaseOrderLineId::new(),
                        order_id,
                        line_no,
                        self.product,
                        unit,
                        Quantity::units(*qty),
                    )
                    .unwrap()
                })
                .collect();
            let ids = lines.iter().map(|l| l.id()).collect();
            self.engine.insert_purchase_order(order, lines).unwrap();
            self.engine.approve_purchase_order(order_id, self.actor).unwrap();
            (order_id, ids)
        }

        fn boxes_of(&self, per_box: i64) -> UnitId {
            let boxes = UnitId::new();
            self.engine
                .register_conversion(UnitConversion {
                    from: boxes,
                    to: self.each,
                    factor: ConversionFactor::new(Decimal::from(per_box)).unwrap(),
                })
                .unwrap();
            boxes
        }
    }

    fn domain(result: Result<impl std::fmt::Debug, StoreError>) -> DomainError {
        result.unwrap_err().domain().cloned().expect("domain error")
    }

    #[test]
    fn first_receipt_creates_bucket_and_one_entry() {
        let fx = setup();
        let bucket = fx.bucket();
        let request = PostingRequest::new(
            bucket,
            Quantity::units(100),
            InventoryReason::Receive,
            Reference::to("purchase_order_line", PurchaseOrderLineId::new()),
            fx.actor,
        );

        fx.engine.post(&request).unwrap();

        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(100));
        let history = fx.engine.ledger_history(bucket).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry.reason, InventoryReason::Receive);
        assert_eq!(history[0].running_qty, Quantity::units(100));
    }

    #[test]
    fn overdraw_is_rejected_and_leaves_no_trace() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 100);

        let err = domain(fx.engine.post(&fx.request(bucket, -150)));

        assert_eq!(
            err,
            DomainError::insufficient_stock(bucket, Quantity::units(150), Quantity::units(100))
        );
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(100));
        assert_eq!(fx.engine.ledger_history(bucket).unwrap().len(), 1);
    }

    #[test]
    fn wire_request_below_quantity_precision_posts_nothing() {
        let fx = setup();
        let bucket = fx.bucket();
        let mut wire = serde_json::to_value(fx.request(bucket, 1)).unwrap();
        wire["qty_delta"] = serde_json::json!("0.0004");
        wire["bucket"]["bin_id"] = serde_json::json!(uuid::Uuid::nil());

        let request: PostingRequest = serde_json::from_value(wire).unwrap();
        assert_eq!(request.bucket, bucket);
        let err = domain(fx.engine.post(&request));

        assert!(matches!(err, DomainError::Validation(_)), "{err:?}");
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::ZERO);
        assert!(fx.engine.ledger_history(bucket).unwrap().is_empty());
    }

    #[test]
    fn unknown_bucket_reads_as_zero() {
        let fx = setup();
        assert_eq!(fx.engine.balance(fx.bucket()).unwrap(), Quantity::ZERO);
        assert_eq!(fx.engine.available_quantity(fx.bucket()).unwrap(), Quantity::ZERO);
        assert!(fx.engine.ledger_history(fx.bucket()).unwrap().is_empty());
    }

    #[test]
    fn reservations_on_a_line_cannot_exceed_ordered() {
        let fx = setup();
        let (first, second) = (fx.bin(), fx.bin());
        fx.stock(first, 100);
        fx.stock(second, 100);
        let (_, lines) = fx.sales_order(&[100]);

        fx.engine
            .create_reservation(lines[0], first, Quantity::units(60), fx.actor)
            .unwrap();
        let err = domain(fx.engine.create_reservation(lines[0], second, Quantity::units(50), fx.actor));

        assert!(matches!(err, DomainError::Validation(_)), "{err:?}");
        assert_eq!(fx.engine.quantity_to_reserve(lines[0]).unwrap(), Quantity::units(40));
        assert_eq!(fx.engine.available_quantity(second).unwrap(), Quantity::units(100));
    }

    #[test]
    fn second_reservation_for_same_line_and_bucket_conflicts() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 100);
        let (_, lines) = fx.sales_order(&[100]);

        fx.engine
            .create_reservation(lines[0], bucket, Quantity::units(10), fx.actor)
            .unwrap();
        let err = domain(fx.engine.create_reservation(lines[0], bucket, Quantity::units(10), fx.actor));

        assert!(matches!(err, DomainError::Conflict(_)), "{err:?}");
    }

    #[test]
    fn reservation_demand_is_bounded_by_on_hand() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 50);
        let (_, lines) = fx.sales_order(&[40, 40]);

        fx.engine
            .create_reservation(lines[0], bucket, Quantity::units(40), fx.actor)
            .unwrap();
        let err = domain(fx.engine.create_reservation(lines[1], bucket, Quantity::units(20), fx.actor));

        assert_eq!(
            err,
            DomainError::insufficient_stock(bucket, Quantity::units(20), Quantity::units(10))
        );
        assert_eq!(fx.engine.available_quantity(bucket).unwrap(), Quantity::units(10));
    }

    #[test]
    fn concurrent_reservations_on_one_bucket_admit_exactly_one() {
        let fx = Arc::new(setup());
        let bucket = fx.bucket();
        fx.stock(bucket, 100);
        let (_, first) = fx.sales_order(&[100]);
        let (_, second) = fx.sales_order(&[100]);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [first[0], second[0]]
            .into_iter()
            .map(|line| {
                let fx = Arc::clone(&fx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    fx.engine
                        .create_reservation(line, bucket, Quantity::units(70), fx.actor)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let rejected = results.into_iter().find(Result::is_err).unwrap();
        assert_eq!(
            domain(rejected),
            DomainError::insufficient_stock(bucket, Quantity::units(70), Quantity::units(30))
        );
        assert_eq!(fx.engine.available_quantity(bucket).unwrap(), Quantity::units(30));
    }

    #[test]
    fn concurrent_postings_keep_balance_equal_to_ledger_sum() {
        let fx = Arc::new(setup());
        let bucket = fx.bucket();
        let threads = 8;
        let rounds = 25;

        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let fx = Arc::clone(&fx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..rounds {
                        fx.engine.post(&fx.request(bucket, 3)).unwrap();
                        fx.engine.post(&fx.request(bucket, -2)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = fx.engine.ledger_history(bucket).unwrap();
        let sum: Quantity = history.iter().map(|e| e.entry.qty_delta).sum();
        let balance = fx.engine.balance(bucket).unwrap();
        assert_eq!(history.len(), threads * rounds * 2);
        assert_eq!(balance, Quantity::units((threads * rounds) as i64));
        assert_eq!(sum, balance);
        assert!(history.iter().all(|e| !e.running_qty.is_negative()));
    }

    #[test]
    fn concurrent_issues_never_overdraw() {
        let fx = Arc::new(setup());
        let bucket = fx.bucket();
        fx.stock(bucket, 10);

        let barrier = Arc::new(Barrier::new(20));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let fx = Arc::clone(&fx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    fx.engine.post(&fx.request(bucket, -1)).is_ok()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 10);
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::ZERO);
    }

    #[test]
    fn retried_posting_with_same_key_is_applied_once() {
        let fx = setup();
        let bucket = fx.bucket();
        let request = fx
            .request(bucket, 5)
            .with_idempotency_key(IdempotencyKey::new("count:42").unwrap());

        let first = fx.engine.post(&request).unwrap();
        let second = fx.engine.post(&request).unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(5));

        let mut changed = request.clone();
        changed.qty_delta = Quantity::units(6);
        let err = domain(fx.engine.post(&changed));
        assert!(matches!(err, DomainError::Conflict(_)), "{err:?}");
    }

    #[test]
    fn posting_times_out_while_bucket_is_held() {
        let balances = BalanceStore::new();
        let ledger = LedgerTable::new();
        let fx = setup();
        let bucket = fx.bucket();
        let request = fx.request(bucket, 1);

        let held = balances.lock(bucket, Duration::from_secs(1)).unwrap();
        let result = thread::scope(|s| {
            s.spawn(|| LedgerPoster::new(&balances, &ledger, Duration::from_millis(50)).post(&request))
                .join()
                .unwrap()
        });
        drop(held);

        assert!(matches!(result, Err(StoreError::LockTimeout { timeout_ms: 50, .. })));
        assert!(ledger.is_empty());
        assert_eq!(balances.lock(bucket, Duration::from_secs(1)).unwrap().on_hand(), Quantity::ZERO);
    }

    #[test]
    fn picklist_closes_after_last_item_is_picked() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 30);
        let (order_id, lines) = fx.sales_order(&[10, 10, 10]);
        let reservations: Vec<_> = lines
            .iter()
            .map(|line| {
                fx.engine
                    .create_reservation(*line, bucket, Quantity::units(10), fx.actor)
                    .unwrap()
            })
            .collect();

        let picklist = fx
            .engine
            .create_picklist_for_order(order_id, fx.warehouse, fx.actor)
            .unwrap();
        let items = fx.engine.pick_items(picklist);
        assert_eq!(items.len(), 3);

        for (n, item) in items.iter().enumerate() {
            fx.engine
                .confirm_pick(item.id(), Quantity::units(10), fx.actor)
                .unwrap();
            let status = fx.engine.picklist(picklist).unwrap().status();
            if n < 2 {
                assert_eq!(status, PicklistStatus::Open);
            } else {
                assert_eq!(status, PicklistStatus::Closed);
            }
        }

        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::ZERO);
        for id in reservations {
            let reservation = fx.engine.reservation(id).unwrap();
            assert_eq!(reservation.status(), ReservationStatus::Picked);
            assert_eq!(reservation.qty_picked(), Quantity::units(10));
        }
        let history = fx.engine.ledger_history(bucket).unwrap();
        assert_eq!(
            history.iter().filter(|e| e.entry.reason == InventoryReason::IssuePick).count(),
            3
        );
    }

    #[test]
    fn partial_pick_keeps_item_open_and_rejects_overpick() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 10);
        let (order_id, lines) = fx.sales_order(&[10]);
        fx.engine
            .create_reservation(lines[0], bucket, Quantity::units(10), fx.actor)
            .unwrap();
        let picklist = fx
            .engine
            .create_picklist_for_order(order_id, fx.warehouse, fx.actor)
            .unwrap();
        let item = fx.engine.pick_items(picklist).remove(0);

        fx.engine
            .confirm_pick(item.id(), Quantity::units(4), fx.actor)
            .unwrap();
        let err = domain(fx.engine.confirm_pick(item.id(), Quantity::units(7), fx.actor));

        assert!(matches!(err, DomainError::InvariantViolation(_)), "{err:?}");
        let item = fx.engine.pick_items(picklist).remove(0);
        assert_eq!(item.status(), PickItemStatus::Open);
        assert_eq!(item.qty_picked(), Quantity::units(4));
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(6));
        assert_ne!(fx.engine.picklist(picklist).unwrap().status(), PicklistStatus::Closed);
    }

    #[test]
    fn short_item_blocks_closing() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 20);
        let (order_id, lines) = fx.sales_order(&[10, 10]);
        for line in &lines {
            fx.engine
                .create_reservation(*line, bucket, Quantity::units(10), fx.actor)
                .unwrap();
        }
        let picklist = fx
            .engine
            .create_picklist_for_order(order_id, fx.warehouse, fx.actor)
            .unwrap();
        fx.engine.start_picklist(picklist, fx.actor).unwrap();
        let items = fx.engine.pick_items(picklist);

        fx.engine
            .confirm_pick(items[0].id(), Quantity::units(10), fx.actor)
            .unwrap();
        fx.engine.short_pick(items[1].id(), fx.actor).unwrap();
        assert_eq!(fx.engine.picklist(picklist).unwrap().status(), PicklistStatus::InProgress);

        fx.engine.delete_pick_item(items[1].id(), fx.actor).unwrap();
        assert_eq!(fx.engine.picklist(picklist).unwrap().status(), PicklistStatus::Closed);
    }

    #[test]
    fn purchase_order_is_received_only_when_every_line_is_full() {
        let fx = setup();
        let bucket = fx.bucket();
        let (order_id, lines) = fx.purchase_order(&[10, 20]);

        fx.engine
            .receive_purchase_order_line(lines[0], bucket, Quantity::units(5), fx.actor)
            .unwrap();
        assert_eq!(fx.engine.purchase_order_status(order_id).unwrap(), PurchaseOrderStatus::Approved);

        fx.engine
            .receive_purchase_order_line(lines[0], bucket, Quantity::units(5), fx.actor)
            .unwrap();
        assert_eq!(fx.engine.purchase_order_status(order_id).unwrap(), PurchaseOrderStatus::Approved);

        fx.engine
            .receive_purchase_order_line(lines[1], bucket, Quantity::units(20), fx.actor)
            .unwrap();
        assert_eq!(fx.engine.purchase_order_status(order_id).unwrap(), PurchaseOrderStatus::Received);
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(30));
    }

    #[test]
    fn receipt_beyond_outstanding_is_rejected() {
        let fx = setup();
        let bucket = fx.bucket();
        let (_, lines) = fx.purchase_order(&[10]);

        fx.engine
            .receive_purchase_order_line(lines[0], bucket, Quantity::units(8), fx.actor)
            .unwrap();
        let err = domain(fx.engine.receive_purchase_order_line(lines[0], bucket, Quantity::units(3), fx.actor));

        assert!(matches!(err, DomainError::Validation(_)), "{err:?}");
        assert_eq!(fx.engine.purchase_order_line(lines[0]).unwrap().qty_received(), Quantity::units(8));
        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(8));
    }

    #[test]
    fn receipt_in_boxes_posts_base_units() {
        let fx = setup();
        let bucket = fx.bucket();
        let boxes = fx.boxes_of(12);
        let (order_id, lines) = fx.purchase_order_in(boxes, &[2]);

        fx.engine
            .receive_purchase_order_line(lines[0], bucket, Quantity::units(2), fx.actor)
            .unwrap();

        assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(24));
        assert_eq!(fx.engine.purchase_order_status(order_id).unwrap(), PurchaseOrderStatus::Received);
    }

    #[test]
    fn reservation_limit_is_in_base_units() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 100);
        let boxes = fx.boxes_of(12);
        let (_, lines) = fx.sales_order_in(boxes, &[2]);

        let err = domain(fx.engine.create_reservation(lines[0], bucket, Quantity::units(25), fx.actor));
        assert!(matches!(err, DomainError::Validation(_)), "{err:?}");

        fx.engine
            .create_reservation(lines[0], bucket, Quantity::units(24), fx.actor)
            .unwrap();
        assert_eq!(fx.engine.quantity_to_reserve(lines[0]).unwrap(), Quantity::ZERO);
    }

    #[test]
    fn released_reservation_frees_availability() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 100);
        let (_, lines) = fx.sales_order(&[100]);
        let id = fx
            .engine
            .create_reservation(lines[0], bucket, Quantity::units(60), fx.actor)
            .unwrap();
        assert_eq!(fx.engine.available_quantity(bucket).unwrap(), Quantity::units(40));

        fx.engine.release_reservation(id, fx.actor).unwrap();

        assert_eq!(fx.engine.available_quantity(bucket).unwrap(), Quantity::units(100));
        assert_eq!(fx.engine.reservation(id).unwrap().status(), ReservationStatus::Released);
    }

    #[test]
    fn cancelled_order_takes_no_reservations() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 100);
        let (order_id, lines) = fx.sales_order(&[10]);
        fx.engine.cancel_sales_order(order_id, fx.actor).unwrap();

        let err = domain(fx.engine.create_reservation(lines[0], bucket, Quantity::units(5), fx.actor));

        assert!(matches!(err, DomainError::InvariantViolation(_)), "{err:?}");
    }

    #[test]
    fn picked_reservation_cannot_exceed_reserved() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 10);
        let (_, lines) = fx.sales_order(&[10]);
        let id = fx
            .engine
            .create_reservation(lines[0], bucket, Quantity::units(10), fx.actor)
            .unwrap();

        let err = domain(fx.engine.update_reservation_picked(id, Quantity::units(11), fx.actor));

        assert!(matches!(err, DomainError::InvariantViolation(_)), "{err:?}");
        assert_eq!(fx.engine.reservation(id).unwrap().qty_picked(), Quantity::ZERO);
    }

    #[test]
    fn shipments_drive_sales_order_status() {
        let fx = setup();
        let bucket = fx.bucket();
        fx.stock(bucket, 10);
        let (order_id, lines) = fx.sales_order(&[10]);
        fx.engine
            .create_reservation(lines[0], bucket, Quantity::units(10), fx.actor)
            .unwrap();
        let picklist = fx
            .engine
            .create_picklist_for_order(order_id, fx.warehouse, fx.actor)
            .unwrap();
        let item = fx.engine.pick_items(picklist).remove(0);
        fx.engine
            .confirm_pick(item.id(), Quantity::units(10), fx.actor)
            .unwrap();

        let partial = fx
            .engine
            .insert_shipment(Shipment::new(ShipmentId::new(), order_id, fx.warehouse, fx.actor))
            .unwrap();
        let partial_item = fx
            .engine
            .add_shipment_item(partial, fx.product, None, Quantity::units(4), fx.actor)
            .unwrap();
        assert_eq!(fx.engine.sales_order_status(order_id).unwrap(), SalesOrderStatus::PartShipped);

        fx.engine.delete_shipment_item(partial_item, fx.actor).unwrap();
        let shipment = fx
            .engine
            .insert_shipment(Shipment::new(ShipmentId::new(), order_id, fx.warehouse, fx.actor))
            .unwrap();
        let created = fx.engine.add_shipment_from_picks(shipment, fx.actor).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(fx.engine.shipment_items(shipment)[0].qty_shipped(), Quantity::units(10));
        assert_eq!(fx.engine.sales_order_status(order_id).unwrap(), SalesOrderStatus::Shipped);
        assert!(fx.engine.add_shipment_from_picks(shipment, fx.actor).unwrap().is_empty());
    }

    #[test]
    fn shipment_item_for_foreign_product_is_rejected() {
        let fx = setup();
        let (order_id, _) = fx.sales_order(&[10]);
        let other = fx
            .engine
            .register_product(Product::new(ProductId::new(), "SKU-2", "Gadget", fx.each, fx.actor).unwrap())
            .unwrap();
        let shipment = fx
            .engine
            .insert_shipment(Shipment::new(ShipmentId::new(), order_id, fx.warehouse, fx.actor))
            .unwrap();

        let err = domain(fx.engine.add_shipment_item(shipment, other, Some(LotId::new()), Quantity::units(1), fx.actor));

        assert!(matches!(err, DomainError::Validation(_)), "{err:?}");
        assert_eq!(fx.engine.sales_order_status(order_id).unwrap(), SalesOrderStatus::Approved);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn reservations_never_exceed_line_or_bucket(
            on_hand in 0i64..60,
            attempts in prop::collection::vec((0usize..3, 0usize..2, 1i64..30), 1..20),
        ) {
            let fx = setup();
            let buckets = [fx.bin(), fx.bin()];
            for bucket in buckets {
                if on_hand > 0 {
                    fx.stock(bucket, on_hand);
                }
            }
            let ordered = [20i64, 35, 50];
            let (_, lines) = fx.sales_order(&ordered);

            let mut per_line = [0i64; 3];
            let mut per_bucket = [0i64; 2];
            for (line, bucket, qty) in attempts {
                if fx.engine.create_reservation(lines[line], buckets[bucket], Quantity::units(qty), fx.actor).is_ok() {
                    per_line[line] += qty;
                    per_bucket[bucket] += qty;
                }
            }

            for (reserved, limit) in per_line.iter().zip(ordered) {
                prop_assert!(*reserved <= limit);
            }
            for (reserved, bucket) in per_bucket.iter().zip(buckets) {
                prop_assert!(*reserved <= on_hand);
                prop_assert_eq!(
                    fx.engine.available_quantity(bucket).unwrap(),
                    Quantity::units(on_hand - reserved)
                );
            }
        }

        #[test]
        fn purchase_status_converges_on_line_totals(
            receipts in prop::collection::vec((0usize..3, 1i64..15), 0..25),
        ) {
            let fx = setup();
            let bucket = fx.bucket();
            let ordered = [10i64, 15, 20];
            let (order_id, lines) = fx.purchase_order(&ordered);

            let mut received = [0i64; 3];
            for (line, qty) in receipts {
                if fx.engine.receive_purchase_order_line(lines[line], bucket, Quantity::units(qty), fx.actor).is_ok() {
                    received[line] += qty;
                }
            }

            let full = received.iter().zip(ordered).all(|(r, o)| *r == o);
            let expected = if full { PurchaseOrderStatus::Received } else { PurchaseOrderStatus::Approved };
            prop_assert_eq!(fx.engine.purchase_order_status(order_id).unwrap(), expected);
            prop_assert_eq!(fx.engine.balance(bucket).unwrap(), Quantity::units(received.iter().sum()));
        }
    }
}
