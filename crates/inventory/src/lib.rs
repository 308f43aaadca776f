//! Inventory domain module (event-sourced).
//!
//! The stock ledger: per-variation stock counters for a product and the
//! append-only audit trail that explains them. Pure deterministic logic
//! (no IO, no HTTP, no storage).

pub mod ledger;

pub use ledger::{
    AddVariation, AdjustmentAction, BatchAdjust, InventoryCommand, InventoryEvent, NewVariation,
    ProductId, ProductRegistered, ProductStock, RegisterProduct, StockAdjustmentLogEntry,
    StockBatchAdjusted, StockTarget, Variation, VariationAdded, VariationId, VariationSpec,
    replay_stock,
};

/// Aggregate type name used for product stock streams.
pub const PRODUCT_STOCK_AGGREGATE_TYPE: &str = "inventory.product_stock";
