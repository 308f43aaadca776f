//! Infrastructure wiring: event store, bus, dispatcher, carrier handoff,
//! read-model projections and the background workers feeding them.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use sellerdesk_core::{Aggregate, AggregateId, DomainError};
use sellerdesk_events::{EventEnvelope, InMemoryEventBus};
use sellerdesk_fulfillment::{
    ORDER_AGGREGATE_TYPE, OpenReturn, Order, OrderCommand, OrderId, StatusBucket,
};
use sellerdesk_infra::{
    carrier::{CarrierAdapter, HttpCarrierClient, ScriptedCarrier},
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent},
    handoff::CarrierHandoff,
    projections::{
        OrderBoardProjection, OrderSummary, ProjectionError, StockHistoryFilter,
        StockHistoryProjection,
        stock_history::{HistoryKey, StockHistoryRow},
    },
    read_model::InMemoryReadModelStore,
    saga::ReturnOrderSync,
    workers::{ProjectionWorker, WorkerHandle, WorkerStats},
};
use sellerdesk_inventory::{
    InventoryCommand, PRODUCT_STOCK_AGGREGATE_TYPE, ProductId, ProductStock,
    StockAdjustmentLogEntry,
};
use sellerdesk_returns::{
    OpenReturnRequest, RETURN_REQUEST_AGGREGATE_TYPE, ReturnCommand, ReturnRequest, ReturnRequestId,
};

use crate::config::{ApiConfig, StoreConfig};

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;

type OrderBoard = OrderBoardProjection<Arc<InMemoryReadModelStore<OrderId, OrderSummary>>>;
type StockHistory =
    StockHistoryProjection<Arc<InMemoryReadModelStore<HistoryKey, StockHistoryRow>>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("projection rebuild failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("failed to spawn worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Everything the route handlers need, shared behind one `Arc`.
pub struct AppServices {
    dispatcher: Arc<Dispatcher>,
    handoff: CarrierHandoff<SharedStore, SharedBus>,
    order_board: Arc<OrderBoard>,
    stock_history: Arc<StockHistory>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    /// Build from configuration: pick the store backend and the carrier client.
    pub async fn build(config: &ApiConfig) -> Result<Self, ServicesError> {
        let store: SharedStore = match &config.store {
            StoreConfig::InMemory => Arc::new(InMemoryEventStore::new()),
            StoreConfig::Postgres { database_url } => {
                info!("using postgres event store");
                Arc::new(PostgresEventStore::connect(database_url).await?)
            }
        };

        let carrier: Arc<dyn CarrierAdapter> = match &config.carrier_base_url {
            Some(base_url) => {
                Arc::new(HttpCarrierClient::new(base_url, config.carrier_api_key.clone()))
            }
            None => {
                warn!("CARRIER_BASE_URL not set; using scripted dev carrier");
                Arc::new(ScriptedCarrier::new())
            }
        };

        Self::assemble(config, store, carrier)
    }

    /// Wire services around an explicit store and carrier.
    ///
    /// Read models are rebuilt from the store before the workers subscribe.
    pub fn assemble(
        config: &ApiConfig,
        store: SharedStore,
        carrier: Arc<dyn CarrierAdapter>,
    ) -> Result<Self, ServicesError> {
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(
            CommandDispatcher::new(store.clone(), bus.clone())
                .with_conflict_retries(config.dispatch_conflict_retries),
        );

        let handoff = CarrierHandoff::new(dispatcher.clone(), carrier)
            .with_window(config.pickup_window)
            .with_default_timeout(config.carrier_timeout);

        let order_board: Arc<OrderBoard> =
            Arc::new(OrderBoardProjection::new(Arc::new(InMemoryReadModelStore::new())));
        let stock_history: Arc<StockHistory> =
            Arc::new(StockHistoryProjection::new(Arc::new(InMemoryReadModelStore::new())));

        let history: Vec<EventEnvelope<JsonValue>> =
            store.load_all()?.iter().map(StoredEvent::to_envelope).collect();
        order_board.rebuild_from_scratch(history.clone())?;
        stock_history.rebuild_from_scratch(history)?;

        let board = order_board.clone();
        let history = stock_history.clone();
        let sync = dispatcher.clone();
        let workers = vec![
            ProjectionWorker::new("order-board")
                .only(ORDER_AGGREGATE_TYPE)
                .spawn(&bus, move |env: &EventEnvelope<JsonValue>| board.apply_envelope(env))?,
            ProjectionWorker::new("stock-history")
                .only(PRODUCT_STOCK_AGGREGATE_TYPE)
                .spawn(&bus, move |env: &EventEnvelope<JsonValue>| history.apply_envelope(env))?,
            ProjectionWorker::new("return-order-sync")
                .only(RETURN_REQUEST_AGGREGATE_TYPE)
                .spawn(&bus, move |env: &EventEnvelope<JsonValue>| {
                    ReturnOrderSync::handle(&sync, env)
                })?,
        ];

        Ok(Self {
            dispatcher,
            handoff,
            order_board,
            stock_history,
            workers: Mutex::new(workers),
        })
    }

    // -------------------------
    // Orders
    // -------------------------

    pub fn dispatch_order(
        &self,
        order_id: AggregateId,
        command: OrderCommand,
    ) -> Result<Order, DispatchError> {
        self.dispatcher
            .dispatch(order_id, ORDER_AGGREGATE_TYPE, command, make_order)?;
        self.load_order(order_id)
    }

    /// Rehydrated order; `NotFound` when the stream is empty.
    pub fn load_order(&self, order_id: AggregateId) -> Result<Order, DispatchError> {
        let order = self.dispatcher.load(order_id, ORDER_AGGREGATE_TYPE, make_order)?;
        if !order.exists() {
            return Err(DomainError::not_found(format!("order {order_id}")).into());
        }
        Ok(order)
    }

    pub async fn request_pickup(
        &self,
        order_id: AggregateId,
        pickup_at: DateTime<Utc>,
        remarks: Option<String>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Order, DispatchError> {
        self.handoff
            .request_pickup(order_id, pickup_at, remarks, timeout, Utc::now())
            .await
    }

    pub fn list_orders(&self, bucket: Option<StatusBucket>) -> Vec<OrderSummary> {
        self.order_board.list(bucket)
    }

    // -------------------------
    // Inventory
    // -------------------------

    pub fn dispatch_inventory(
        &self,
        product_id: AggregateId,
        command: InventoryCommand,
    ) -> Result<ProductStock, DispatchError> {
        self.dispatcher
            .dispatch(product_id, PRODUCT_STOCK_AGGREGATE_TYPE, command, make_product)?;
        self.load_product(product_id)
    }

    pub fn load_product(&self, product_id: AggregateId) -> Result<ProductStock, DispatchError> {
        let product = self.dispatcher.load(product_id, PRODUCT_STOCK_AGGREGATE_TYPE, make_product)?;
        if !product.exists() {
            return Err(DomainError::not_found(format!("product {product_id}")).into());
        }
        Ok(product)
    }

    pub fn stock_history(&self, filter: StockHistoryFilter) -> Vec<StockAdjustmentLogEntry> {
        self.stock_history.query(filter)
    }

    // -------------------------
    // Returns
    // -------------------------

    pub fn dispatch_return(
        &self,
        return_request_id: AggregateId,
        command: ReturnCommand,
    ) -> Result<ReturnRequest, DispatchError> {
        self.dispatcher
            .dispatch(return_request_id, RETURN_REQUEST_AGGREGATE_TYPE, command, make_return)?;
        self.load_return(return_request_id)
    }

    /// Open a return request against a delivered order.
    ///
    /// The order stream is claimed first, under the same version check as
    /// every other order command, so one order never ends up with two live
    /// requests. The request is validated before the claim.
    pub fn open_return(
        &self,
        order_id: AggregateId,
        reason: String,
    ) -> Result<ReturnRequest, DispatchError> {
        let order = self.load_order(order_id)?;
        let request_id = AggregateId::new();
        let now = Utc::now();

        let open = ReturnCommand::Open(OpenReturnRequest {
            return_request_id: ReturnRequestId::new(request_id),
            order_id,
            reason,
            order_total: order.total(),
            occurred_at: now,
        });
        make_return(request_id).handle(&open)?;

        let claim = OrderCommand::OpenReturn(OpenReturn {
            order_id: OrderId(order_id),
            return_request_id: request_id,
            occurred_at: now,
        });
        self.dispatcher
            .dispatch(order_id, ORDER_AGGREGATE_TYPE, claim, make_order)?;
        info!(order_id = %order_id, return_request_id = %request_id, "order claimed for return");

        self.dispatch_return(request_id, open)
    }

    pub fn load_return(
        &self,
        return_request_id: AggregateId,
    ) -> Result<ReturnRequest, DispatchError> {
        let request = self.dispatcher
            .load(return_request_id, RETURN_REQUEST_AGGREGATE_TYPE, make_return)?;
        if !request.exists() {
            let what = format!("return request {return_request_id}");
            return Err(DomainError::not_found(what).into());
        }
        Ok(request)
    }

    /// Counters per background worker, in spawn order. Empty after shutdown.
    pub fn worker_stats(&self) -> Vec<(&'static str, WorkerStats)> {
        match self.workers.lock() {
            Ok(workers) => workers.iter().map(|w| (w.name(), w.stats())).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Stop background workers and wait for them to exit.
    pub fn shutdown(&self) {
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for worker in workers {
            let name = worker.name();
            let stats = worker.shutdown();
            info!(
                worker = name,
                processed = stats.processed,
                failed = stats.failed,
                "worker stopped"
            );

        }
    }
}

fn make_order(id: AggregateId) -> Order {
    Order::empty(OrderId(id))
}

fn make_product(id: AggregateId) -> ProductStock {
    ProductStock::empty(ProductId(id))
}

fn make_return(id: AggregateId) -> ReturnRequest {
    ReturnRequest::empty(ReturnRequestId(id))
}
