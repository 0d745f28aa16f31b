//! In-memory storage: bucket balances, the ledger and document tables.
//!
//! Lock order, outermost first. Every operation acquires in this order and
//! never goes back up:
//!
//! 1. one bucket lock ([`BalanceStore::lock`])
//! 2. document tables, in the field order of [`Documents`]
//! 3. the ledger table (held only inside an append)

pub mod balances;
pub mod ledger;
pub mod table;

use parking_lot::RwLock;

use stockledger_inventory::{PickItem, Picklist, Reservation};
use stockledger_products::{ConversionTable, Product};
use stockledger_purchasing::{PurchaseOrder, PurchaseOrderLine};
use stockledger_sales::{SalesOrder, SalesOrderLine, Shipment, ShipmentItem};

pub use balances::{BalanceStore, BucketGuard};
pub use ledger::LedgerTable;
pub use table::{Rows, Table};

/// Every document table, declared in lock order.
#[derive(Debug)]
pub struct Documents {
    pub reservations: Table<Reservation>,
    pub pick_items: Table<PickItem>,
    pub picklists: Table<Picklist>,
    pub purchase_order_lines: Table<PurchaseOrderLine>,
    pub purchase_orders: Table<PurchaseOrder>,
    pub sales_order_lines: Table<SalesOrderLine>,
    pub sales_orders: Table<SalesOrder>,
    pub shipments: Table<Shipment>,
    pub shipment_items: Table<ShipmentItem>,
    pub products: Table<Product>,
    pub conversions: RwLock<ConversionTable>,
}

impl Default for Documents {
    fn default() -> Self {
        Self {
            reservations: Table::new("reservation"),
            pick_items: Table::new("pick item"),
            picklists: Table::new("picklist"),
            purchase_order_lines: Table::new("purchase order line"),
            purchase_orders: Table::new("purchase order"),
            sales_order_lines: Table::new("sales order line"),
            sales_orders: Table::new("sales order"),
            shipments: Table::new("shipment"),
            shipment_items: Table::new("shipment item"),
            products: Table::new("product"),
            conversions: RwLock::new(ConversionTable::new()),
        }
    }
}
