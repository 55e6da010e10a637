//! In-memory item store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CreateOutcome, ItemStore};
use crate::error::StoreError;
use crate::item::{Item, NewItem, Stage, StagePredicate, StageUpdate};

#[derive(Default)]
struct Inner {
    /// Items in insertion order.
    items: Vec<Item>,
    by_link: HashMap<String, usize>,
    by_id: HashMap<Uuid, usize>,
}

/// Insertion-ordered store kept in process memory.
#[derive(Default)]
pub struct MemoryItemStore {
    inner: RwLock<Inner>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed item, replacing any item with the same id.
    ///
    /// Used to seed fixtures. Links stay unique: an item whose link belongs
    /// to a different item is rejected with [`StoreError::DuplicateLink`].
    pub async fn insert(&self, item: Item) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let existing = inner.by_id.get(&item.id).copied();
        if let Some(&owner) = inner.by_link.get(&item.source_link) {
            if Some(owner) != existing {
                return Err(StoreError::DuplicateLink(item.source_link));
            }
        }

        match existing {
            Some(idx) => {
                let old_link = inner.items[idx].source_link.clone();
                inner.by_link.remove(&old_link);
                inner.by_link.insert(item.source_link.clone(), idx);
                inner.items[idx] = item;
            }
            None => {
                let idx = inner.items.len();
                inner.by_link.insert(item.source_link.clone(), idx);
                inner.by_id.insert(item.id, idx);
                inner.items.push(item);
            }
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn find_by_stage_predicate(
        &self,
        predicate: StagePredicate,
    ) -> Result<Vec<Item>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .items
            .iter()
            .filter(|item| predicate.matches(item))
            .cloned()
            .collect())
    }

    async fn create_if_absent(&self, item: NewItem) -> Result<CreateOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(&idx) = inner.by_link.get(&item.source_link) {
            return Ok(CreateOutcome {
                created: false,
                id: inner.items[idx].id,
            });
        }

        let item = Item::scraped(item, Utc::now());
        let id = item.id;
        let idx = inner.items.len();
        inner.by_link.insert(item.source_link.clone(), idx);
        inner.by_id.insert(id, idx);
        inner.items.push(item);
        Ok(CreateOutcome { created: true, id })
    }

    async fn update_stage(
        &self,
        id: Uuid,
        stage: Stage,
        update: StageUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let idx = *inner.by_id.get(&id).ok_or(StoreError::NotFound(id))?;
        inner.items[idx].apply(stage, update, Utc::now())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Item>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.by_id.get(&id).map(|&idx| inner.items[idx].clone()))
    }

    async fn list(&self) -> Result<Vec<Item>, StoreError> {
        Ok(self.inner.read().await.items.clone())
    }
}
