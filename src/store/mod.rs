//! Item store gateway.
//!
//! The pipeline reads and writes item state only through [`ItemStore`]:
//! eligibility queries by [`StagePredicate`], deduplicated creation keyed by
//! the normalized source link, and per-stage flag updates. Two backends are
//! provided: [`MemoryItemStore`] for tests and dry runs, and
//! [`SqliteItemStore`] for persistent operation.

mod memory;
mod sqlite;

pub use memory::MemoryItemStore;
pub use sqlite::SqliteItemStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::item::{Item, NewItem, Stage, StagePredicate, StageUpdate};

/// Result of [`ItemStore::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOutcome {
    /// False when an item with the same source link already existed.
    pub created: bool,
    /// Id of the new or existing item.
    pub id: Uuid,
}

/// Persistent item state, the single source of truth across runs.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Items matching `predicate`, in insertion order.
    async fn find_by_stage_predicate(
        &self,
        predicate: StagePredicate,
    ) -> Result<Vec<Item>, StoreError>;

    /// Insert unless an item with the same source link exists; atomic.
    async fn create_if_absent(&self, item: NewItem) -> Result<CreateOutcome, StoreError>;

    /// Apply one stage update to one item.
    async fn update_stage(
        &self,
        id: Uuid,
        stage: Stage,
        update: StageUpdate,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Item>, StoreError>;

    /// Every stored item, in insertion order.
    async fn list(&self) -> Result<Vec<Item>, StoreError>;
}

/// Per-stage counts used by the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub total: usize,
    /// Items whose furthest completed stage is the key.
    pub by_stage: BTreeMap<Stage, usize>,
    /// Items eligible for each processing stage.
    pub eligible: BTreeMap<String, usize>,
    /// Items with an error recorded on a stage that is not done.
    pub failing: usize,
    /// Items parked on an unconfirmed outcome.
    pub held: usize,
}

impl StoreSummary {
    pub fn from_items(items: &[Item]) -> Self {
        let mut summary = Self {
            total: items.len(),
            ..Default::default()
        };
        for predicate in StagePredicate::ALL {
            summary.eligible.insert(predicate.to_string(), 0);
        }
        for item in items {
            *summary.by_stage.entry(item.stage()).or_insert(0) += 1;
            for predicate in StagePredicate::ALL {
                if predicate.matches(item) {
                    *summary.eligible.entry(predicate.to_string()).or_insert(0) += 1;
                }
            }
            let flags = Stage::ALL.iter().map(|s| item.flags.get(*s));
            if flags.clone().any(|f| !f.done && f.last_error.is_some()) {
                summary.failing += 1;
            }
            if flags.into_iter().any(|f| f.held) {
                summary.held += 1;
            }
        }
        summary
    }
}

/// Count items per stage and eligibility.
pub async fn summarize(store: &dyn ItemStore) -> Result<StoreSummary, StoreError> {
    let items = store.list().await?;
    Ok(StoreSummary::from_items(&items))
}
