use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sellerdesk_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, UserId, uuid_newtype,
};
use sellerdesk_events::Event;

/// Product identifier; one stock stream per product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

uuid_newtype!(VariationId, "VariationId");

/// Intent behind a stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentAction {
    /// Opening balance at registration. Not accepted by `BatchAdjust`.
    Initial,
    ReceiveItems,
    InventoryCount,
    LossDamage,
}

impl AdjustmentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentAction::Initial => "initial",
            AdjustmentAction::ReceiveItems => "receive_items",
            AdjustmentAction::InventoryCount => "inventory_count",
            AdjustmentAction::LossDamage => "loss_damage",
        }
    }

    /// Absolute target a caller submits for this intent.
    ///
    /// Receive adds, count replaces, loss/damage subtracts. The result may be
    /// negative; the ledger rejects it when submitted.
    pub fn target_stock(self, current: i64, input: i64) -> i64 {
        match self {
            AdjustmentAction::ReceiveItems => current.saturating_add(input),
            AdjustmentAction::LossDamage => current.saturating_sub(input),
            AdjustmentAction::Initial | AdjustmentAction::InventoryCount => input,
        }
    }
}

impl core::fmt::Display for AdjustmentAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AdjustmentAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(AdjustmentAction::Initial),
            "receive_items" => Ok(AdjustmentAction::ReceiveItems),
            "inventory_count" => Ok(AdjustmentAction::InventoryCount),
            "loss_damage" => Ok(AdjustmentAction::LossDamage),
            other => Err(DomainError::validation(format!(
                "unknown adjustment action '{other}'"
            ))),
        }
    }
}

/// One stock unit of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub id: VariationId,
    pub name: String,
    pub stock: i64,
}

/// Audit record: one per (adjustment command × affected variation).
///
/// Invariant: `after_stock == before_stock + adjustment` and `after_stock >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustmentLogEntry {
    pub product_id: ProductId,
    pub variation_id: VariationId,
    pub before_stock: i64,
    pub after_stock: i64,
    pub adjustment: i64,
    pub action: AdjustmentAction,
    pub reason: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl StockAdjustmentLogEntry {
    pub fn is_consistent(&self) -> bool {
        self.after_stock >= 0
            && self.before_stock.checked_add(self.adjustment) == Some(self.after_stock)
    }
}

/// Rebuild per-variation stock from log entries alone.
pub fn replay_stock<'a>(
    entries: impl IntoIterator<Item = &'a StockAdjustmentLogEntry>,
) -> BTreeMap<VariationId, i64> {
    let mut stock = BTreeMap::new();
    for entry in entries {
        *stock.entry(entry.variation_id).or_insert(0) += entry.adjustment;
    }
    stock
}

/// Aggregate root: ProductStock (the stock ledger for one product).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    id: ProductId,
    name: String,
    variations: Vec<Variation>,
    log: Vec<StockAdjustmentLogEntry>,
    version: u64,
    created: bool,
}

impl ProductStock {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            variations: Vec::new(),
            log: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variations(&self) -> &[Variation] {
        &self.variations
    }

    pub fn variation(&self, id: VariationId) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == id)
    }

    pub fn stock_of(&self, id: VariationId) -> Option<i64> {
        self.variation(id).map(|v| v.stock)
    }

    /// Audit trail in append order.
    pub fn log(&self) -> &[StockAdjustmentLogEntry] {
        &self.log
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A variation as supplied at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariation {
    pub variation_id: VariationId,
    pub name: String,
    pub initial_stock: i64,
}

/// Absolute stock target for one variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTarget {
    pub variation_id: VariationId,
    pub new_stock: i64,
}

/// Command: RegisterProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub name: String,
    pub variations: Vec<NewVariation>,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddVariation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVariation {
    pub product_id: ProductId,
    pub variation: NewVariation,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BatchAdjust. All targets land or none do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAdjust {
    pub product_id: ProductId,
    pub action: AdjustmentAction,
    pub reason: String,
    pub user_id: UserId,
    pub adjustments: Vec<StockTarget>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    RegisterProduct(RegisterProduct),
    AddVariation(AddVariation),
    BatchAdjust(BatchAdjust),
}

/// Event: ProductRegistered. Carries the opening-balance entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub name: String,
    pub variations: Vec<VariationSpec>,
    pub entries: Vec<StockAdjustmentLogEntry>,
    pub occurred_at: DateTime<Utc>,
}

/// Variation identity as recorded in events (stock comes from entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationSpec {
    pub variation_id: VariationId,
    pub name: String,
}

/// Event: VariationAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationAdded {
    pub product_id: ProductId,
    pub variation: VariationSpec,
    pub entry: StockAdjustmentLogEntry,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockBatchAdjusted. Stock change and audit entries are one fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatchAdjusted {
    pub product_id: ProductId,
    pub action: AdjustmentAction,
    pub reason: String,
    pub user_id: UserId,
    pub entries: Vec<StockAdjustmentLogEntry>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ProductRegistered(ProductRegistered),
    VariationAdded(VariationAdded),
    StockBatchAdjusted(StockBatchAdjusted),
}

impl InventoryEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            InventoryEvent::ProductRegistered(e) => e.product_id,
            InventoryEvent::VariationAdded(e) => e.product_id,
            InventoryEvent::StockBatchAdjusted(e) => e.product_id,
        }
    }

    /// Log entries carried by this event, in batch order.
    pub fn log_entries(&self) -> &[StockAdjustmentLogEntry] {
        match self {
            InventoryEvent::ProductRegistered(e) => &e.entries,
            InventoryEvent::VariationAdded(e) => core::slice::from_ref(&e.entry),
            InventoryEvent::StockBatchAdjusted(e) => &e.entries,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductRegistered(_) => "inventory.product.registered",
            InventoryEvent::VariationAdded(_) => "inventory.product.variation_added",
            InventoryEvent::StockBatchAdjusted(_) => "inventory.product.stock_batch_adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ProductRegistered(e) => e.occurred_at,
            InventoryEvent::VariationAdded(e) => e.occurred_at,
            InventoryEvent::StockBatchAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.variations = e
                    .variations
                    .iter()
                    .map(|v| Variation {
                        id: v.variation_id,
                        name: v.name.clone(),
                        stock: 0,
                    })
                    .collect();
                self.created = true;
            }
            InventoryEvent::VariationAdded(e) => {
                self.variations.push(Variation {
                    id: e.variation.variation_id,
                    name: e.variation.name.clone(),
                    stock: 0,
                });
            }
            InventoryEvent::StockBatchAdjusted(_) => {}
        }

        for entry in event.log_entries() {
            if let Some(v) = self.variations.iter_mut().find(|v| v.id == entry.variation_id) {
                v.stock = entry.after_stock;
            }
            self.log.push(entry.clone());
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            InventoryCommand::AddVariation(cmd) => self.handle_add_variation(cmd),
            InventoryCommand::BatchAdjust(cmd) => self.handle_batch_adjust(cmd),
        }
    }
}

impl ProductStock {
    fn ensure_created(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("product {}", self.id)));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> DomainResult<()> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    /// Timestamp for a new log entry: never earlier than the last one.
    ///
    /// A command stamped before a concurrent winner is re-decided on top of
    /// it, so its entries must also sort after it.
    fn entry_time(&self, requested: DateTime<Utc>) -> DateTime<Utc> {
        match self.log.last() {
            Some(last) => requested.max(last.created_at),
            None => requested,
        }
    }

    fn opening_entry(
        &self,
        product_id: ProductId,
        variation: &NewVariation,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<StockAdjustmentLogEntry> {
        if variation.name.trim().is_empty() {
            return Err(DomainError::validation("variation name cannot be empty"));
        }
        if variation.initial_stock < 0 {
            return Err(DomainError::invalid_stock(format!(
                "variation {}: initial stock {} is negative",
                variation.variation_id, variation.initial_stock
            )));
        }
        Ok(StockAdjustmentLogEntry {
            product_id,
            variation_id: variation.variation_id,
            before_stock: 0,
            after_stock: variation.initial_stock,
            adjustment: variation.initial_stock,
            action: AdjustmentAction::Initial,
            reason: "initial stock".to_string(),
            user_id,
            created_at: at,
        })
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> DomainResult<Vec<InventoryEvent>> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.variations.is_empty() {
            return Err(DomainError::validation(
                "product must have at least one variation",
            ));
        }

        let mut seen = BTreeSet::new();
        let mut entries = Vec::with_capacity(cmd.variations.len());
        for v in &cmd.variations {
            if !seen.insert(v.variation_id) {
                return Err(DomainError::validation(format!(
                    "duplicate variation {}",
                    v.variation_id
                )));
            }
            entries.push(self.opening_entry(cmd.product_id, v, cmd.user_id, cmd.occurred_at)?);
        }

        Ok(vec![InventoryEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            variations: cmd
                .variations
                .iter()
                .map(|v| VariationSpec {
                    variation_id: v.variation_id,
                    name: v.name.clone(),
                })
                .collect(),
            entries,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_variation(&self, cmd: &AddVariation) -> DomainResult<Vec<InventoryEvent>> {
        self.ensure_created()?;
        self.ensure_product_id(cmd.product_id)?;

        if self.variation(cmd.variation.variation_id).is_some() {
            return Err(DomainError::conflict(format!(
                "variation {} already exists",
                cmd.variation.variation_id
            )));
        }

        let at = self.entry_time(cmd.occurred_at);
        let entry = self.opening_entry(cmd.product_id, &cmd.variation, cmd.user_id, at)?;

        Ok(vec![InventoryEvent::VariationAdded(VariationAdded {
            product_id: cmd.product_id,
            variation: VariationSpec {
                variation_id: cmd.variation.variation_id,
                name: cmd.variation.name.clone(),
            },
            entry,
            occurred_at: at,
        })])
    }

    fn handle_batch_adjust(&self, cmd: &BatchAdjust) -> DomainResult<Vec<InventoryEvent>> {
        self.ensure_created()?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.action == AdjustmentAction::Initial {
            return Err(DomainError::validation(
                "action 'initial' is reserved for registration",
            ));
        }
        if cmd.adjustments.is_empty() {
            return Err(DomainError::invalid_stock("batch contains no adjustments"));
        }

        let at = self.entry_time(cmd.occurred_at);

        // Every target is checked before anything is decided.
        let mut seen = BTreeSet::new();
        let mut entries = Vec::with_capacity(cmd.adjustments.len());
        for target in &cmd.adjustments {
            if !seen.insert(target.variation_id) {
                return Err(DomainError::invalid_stock(format!(
                    "variation {} appears more than once in the batch",
                    target.variation_id
                )));
            }
            let before = self.stock_of(target.variation_id).ok_or_else(|| {
                DomainError::not_found(format!("variation {}", target.variation_id))
            })?;
            if target.new_stock < 0 {
                return Err(DomainError::invalid_stock(format!(
                    "variation {}: new stock {} would be negative (current {})",
                    target.variation_id, target.new_stock, before
                )));
            }

            entries.push(StockAdjustmentLogEntry {
                product_id: cmd.product_id,
                variation_id: target.variation_id,
                before_stock: before,
                after_stock: target.new_stock,
                adjustment: target.new_stock - before,
                action: cmd.action,
                reason: cmd.reason.clone(),
                user_id: cmd.user_id,
                created_at: at,
            });
        }

        Ok(vec![InventoryEvent::StockBatchAdjusted(StockBatchAdjusted {
            product_id: cmd.product_id,
            action: cmd.action,
            reason: cmd.reason.clone(),
            user_id: cmd.user_id,
            entries,
            occurred_at: at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register(product_id: ProductId, stocks: &[i64]) -> (ProductStock, Vec<VariationId>) {
        let variations: Vec<NewVariation> = stocks
            .iter()
            .enumerate()
            .map(|(i, s)| NewVariation {
                variation_id: VariationId::new(),
                name: format!("size-{i}"),
                initial_stock: *s,
            })
            .collect();
        let ids = variations.iter().map(|v| v.variation_id).collect();

        let mut product = ProductStock::empty(product_id);
        let events = product
            .handle(&InventoryCommand::RegisterProduct(RegisterProduct {
                product_id,
                name: "T-shirt".to_string(),
                variations,
                user_id: UserId::system(),
                occurred_at: test_time(),
            }))
            .unwrap();
        product.replay(&events);
        (product, ids)
    }

    fn adjust(
        product_id: ProductId,
        action: AdjustmentAction,
        targets: &[(VariationId, i64)],
    ) -> InventoryCommand {
        InventoryCommand::BatchAdjust(BatchAdjust {
            product_id,
            action,
            reason: "test".to_string(),
            user_id: UserId::new(),
            adjustments: targets
                .iter()
                .map(|(variation_id, new_stock)| StockTarget {
                    variation_id: *variation_id,
                    new_stock: *new_stock,
                })
                .collect(),
            occurred_at: test_time(),
        })
    }

    fn stamped(cmd: InventoryCommand, at: DateTime<Utc>) -> InventoryCommand {
        match cmd {
            InventoryCommand::BatchAdjust(batch) => InventoryCommand::BatchAdjust(BatchAdjust {
                occurred_at: at,
                ..batch
            }),
            other => other,
        }
    }

    #[test]
    fn late_decided_batch_sorts_after_the_entry_it_follows() {
        let product_id = test_product_id();
        let (mut product, ids) = register(product_id, &[10]);
        let t0 = Utc::now() + chrono::Duration::seconds(1);

        // Stamped later but committed first.
        let winner = stamped(
            adjust(product_id, AdjustmentAction::InventoryCount, &[(ids[0], 7)]),
            t0 + chrono::Duration::milliseconds(2),
        );
        product.execute(&winner).unwrap();

        // Stamped earlier, re-decided on top of the winner.
        let retried = stamped(
            adjust(product_id, AdjustmentAction::LossDamage, &[(ids[0], 4)]),
            t0 + chrono::Duration::milliseconds(1),
        );
        product.execute(&retried).unwrap();

        let mut by_time = product.log().to_vec();
        by_time.sort_by_key(|e| e.created_at);
        let chain: Vec<(i64, i64)> =
            by_time.iter().map(|e| (e.before_stock, e.after_stock)).collect();
        assert_eq!(chain, vec![(0, 10), (10, 7), (7, 4)]);
        for pair in by_time.windows(2) {
            assert_eq!(pair[0].after_stock, pair[1].before_stock);
        }
        assert_eq!(product.stock_of(ids[0]), Some(4));
    }

    #[test]
    fn registration_logs_opening_balances() {
        let product_id = test_product_id();
        let (product, ids) = register(product_id, &[10, 0]);

        assert_eq!(product.stock_of(ids[0]), Some(10));
        assert_eq!(product.stock_of(ids[1]), Some(0));
        assert_eq!(product.log().len(), 2);
        assert!(product.log().iter().all(|e| e.action == AdjustmentAction::Initial));
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn registration_rejects_negative_initial_stock() {
        let product_id = test_product_id();
        let err = ProductStock::empty(product_id)
            .handle(&InventoryCommand::RegisterProduct(RegisterProduct {
                product_id,
                name: "Mug".to_string(),
                variations: vec![NewVariation {
                    variation_id: VariationId::new(),
                    name: "default".to_string(),
                    initial_stock: -3,
                }],
                user_id: UserId::system(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStock(_)));
    }

    #[test]
    fn loss_damage_records_negative_adjustment() {
        let product_id = test_product_id();
        let (mut product, ids) = register(product_id, &[10]);
        let target = AdjustmentAction::LossDamage.target_stock(10, 6);

        let events = product
            .handle(&adjust(product_id, AdjustmentAction::LossDamage, &[(ids[0], target)]))
            .unwrap();
        product.replay(&events);

        let entry = product.log().last().unwrap();
        assert_eq!(entry.before_stock, 10);
        assert_eq!(entry.after_stock, 4);
        assert_eq!(entry.adjustment, -6);
        assert_eq!(entry.action, AdjustmentAction::LossDamage);
        assert_eq!(product.stock_of(ids[0]), Some(4));
    }

    #[test]
    fn negative_target_fails_whole_batch() {
        let product_id = test_product_id();
        let (product, ids) = register(product_id, &[10, 5]);
        let before = product.clone();

        let err = product
            .handle(&adjust(
                product_id,
                AdjustmentAction::InventoryCount,
                &[(ids[0], 7), (ids[1], -1)],
            ))
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidStock(_)));
        assert_eq!(product, before);
    }

    #[test]
    fn unknown_variation_is_not_found() {
        let product_id = test_product_id();
        let (product, _) = register(product_id, &[1]);
        let err = product
            .handle(&adjust(
                product_id,
                AdjustmentAction::ReceiveItems,
                &[(VariationId::new(), 3)],
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn duplicate_and_empty_batches_are_invalid_stock() {
        let product_id = test_product_id();
        let (product, ids) = register(product_id, &[1]);

        let dup = product
            .handle(&adjust(
                product_id,
                AdjustmentAction::ReceiveItems,
                &[(ids[0], 2), (ids[0], 3)],
            ))
            .unwrap_err();
        assert!(matches!(dup, DomainError::InvalidStock(_)));

        let empty = product
            .handle(&adjust(product_id, AdjustmentAction::ReceiveItems, &[]))
            .unwrap_err();
        assert!(matches!(empty, DomainError::InvalidStock(_)));
    }

    #[test]
    fn unchanged_target_still_produces_entry() {
        let product_id = test_product_id();
        let (product, ids) = register(product_id, &[8]);
        let events = product
            .handle(&adjust(product_id, AdjustmentAction::InventoryCount, &[(ids[0], 8)]))
            .unwrap();
        assert_eq!(events[0].log_entries().len(), 1);
        assert_eq!(events[0].log_entries()[0].adjustment, 0);
    }

    #[test]
    fn initial_action_is_reserved() {
        let product_id = test_product_id();
        let (product, ids) = register(product_id, &[8]);
        let err = product
            .handle(&adjust(product_id, AdjustmentAction::Initial, &[(ids[0], 2)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn add_variation_extends_product() {
        let product_id = test_product_id();
        let (mut product, _) = register(product_id, &[1]);
        let variation_id = VariationId::new();
        let events = product
            .handle(&InventoryCommand::AddVariation(AddVariation {
                product_id,
                variation: NewVariation {
                    variation_id,
                    name: "XL".to_string(),
                    initial_stock: 12,
                },
                user_id: UserId::system(),
                occurred_at: test_time(),
            }))
            .unwrap();
        product.replay(&events);
        assert_eq!(product.variations().len(), 2);
        assert_eq!(product.stock_of(variation_id), Some(12));
    }

    #[test]
    fn target_stock_per_action() {
        assert_eq!(AdjustmentAction::ReceiveItems.target_stock(10, 5), 15);
        assert_eq!(AdjustmentAction::InventoryCount.target_stock(10, 5), 5);
        assert_eq!(AdjustmentAction::LossDamage.target_stock(10, 12), -2);
    }

    #[test]
    fn action_parses_from_wire_name() {
        for action in [
            AdjustmentAction::ReceiveItems,
            AdjustmentAction::InventoryCount,
            AdjustmentAction::LossDamage,
        ] {
            assert_eq!(action.as_str().parse::<AdjustmentAction>().unwrap(), action);
        }
        assert!("restock".parse::<AdjustmentAction>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: stock replayed from the log equals current stock, and
        /// every entry satisfies after == before + adjustment.
        #[test]
        fn replay_reconstructs_stock(
            initial in prop::collection::vec(0i64..100, 1..5),
            rounds in prop::collection::vec(prop::collection::vec(0i64..200, 5), 0..8),
        ) {
            let product_id = test_product_id();
            let (mut product, ids) = register(product_id, &initial);

            for round in rounds {
                let targets: Vec<(VariationId, i64)> =
                    ids.iter().copied().zip(round.iter().copied()).collect();
                let events = product
                    .handle(&adjust(product_id, AdjustmentAction::InventoryCount, &targets))
                    .unwrap();
                prop_assert_eq!(events[0].log_entries().len(), ids.len());
                for e in &events {
                    product.apply(e);
                }
            }

            prop_assert!(product.log().iter().all(StockAdjustmentLogEntry::is_consistent));
            let replayed = replay_stock(product.log());
            for v in product.variations() {
                prop_assert_eq!(replayed.get(&v.id).copied(), Some(v.stock));
            }
        }

        /// Property: a batch containing any negative target changes nothing.
        #[test]
        fn batch_is_all_or_nothing(
            initial in prop::collection::vec(0i64..50, 2..5),
            targets in prop::collection::vec(-20i64..50, 5),
        ) {
            let product_id = test_product_id();
            let (product, ids) = register(product_id, &initial);
            let batch: Vec<(VariationId, i64)> =
                ids.iter().copied().zip(targets.iter().copied()).collect();

            let count = adjust(product_id, AdjustmentAction::InventoryCount, &batch);
            let result = product.handle(&count);

            if batch.iter().any(|(_, s)| *s < 0) {
                prop_assert!(matches!(result, Err(DomainError::InvalidStock(_))));
            } else {
                let events = result.unwrap();
                let mut after = product.clone();
                for e in &events {
                    after.apply(e);
                }
                for (id, s) in &batch {
                    prop_assert_eq!(after.stock_of(*id), Some(*s));
                }
            }
        }
    }
}
