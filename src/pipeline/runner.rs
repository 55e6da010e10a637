//! Stage runner: the per-item loop shared by every processing stage.
//!
//! A run fetches the items eligible for one stage, takes at most
//! `batch_size` of them in store order, and processes them sequentially with
//! a fixed pause between items. Each item's result is written back through
//! the [`ItemStore`]; one item failing never aborts the batch. Only a fatal
//! store error ends the run early.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{StageError, StoreError};
use crate::item::{Item, Stage, StagePayload, StagePredicate, StageUpdate};
use crate::metrics;
use crate::store::ItemStore;

/// The work one stage performs for a single item.
#[async_trait]
pub trait StageJob: Send + Sync {
    /// Filter selecting the items this job processes.
    fn predicate(&self) -> StagePredicate;

    /// Stage whose flag this job completes.
    fn stage(&self) -> Stage {
        self.predicate().stage()
    }

    /// Produce the stage payload for `item`.
    async fn process(&self, item: &Item) -> Result<StagePayload, StageError>;

    /// Hook invoked after the completion has been persisted.
    async fn after_recorded(&self, _item: &Item) {}
}

/// Outcome of one item in a stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub item_id: Uuid,
    pub success: bool,
    /// The item was not processed because an input was missing.
    pub skipped: bool,
    pub error: Option<String>,
}

impl ItemOutcome {
    fn succeeded(item_id: Uuid) -> Self {
        Self {
            item_id,
            success: true,
            skipped: false,
            error: None,
        }
    }

    fn failed(item_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            skipped: false,
            error: Some(error.into()),
        }
    }

    fn skipped(item_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            skipped: true,
            error: Some(reason.into()),
        }
    }
}

/// Runs [`StageJob`]s against an item store.
pub struct StageRunner {
    store: Arc<dyn ItemStore>,
    item_delay: Duration,
}

impl StageRunner {
    pub fn new(store: Arc<dyn ItemStore>, item_delay: Duration) -> Self {
        Self { store, item_delay }
    }

    /// Process up to `batch_size` eligible items with `job`.
    ///
    /// # Errors
    ///
    /// Returns the store error when the eligibility query or a write fails
    /// fatally. Per-item failures are reported in the outcomes instead.
    pub async fn run(
        &self,
        job: &dyn StageJob,
        batch_size: usize,
    ) -> Result<Vec<ItemOutcome>, StoreError> {
        let stage = job.stage();
        let eligible = self.store.find_by_stage_predicate(job.predicate()).await?;
        if eligible.is_empty() {
            tracing::info!(stage = %stage, "No eligible items");
            return Ok(Vec::new());
        }

        let total_eligible = eligible.len();
        let batch: Vec<Item> = eligible.into_iter().take(batch_size).collect();
        tracing::info!(
            stage = %stage,
            eligible = total_eligible,
            batch = batch.len(),
            "Processing stage batch"
        );

        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, item) in batch.iter().enumerate() {
            if index > 0 && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
            outcomes.push(self.process_item(job, item).await?);
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        tracing::info!(
            stage = %stage,
            succeeded = succeeded,
            total = outcomes.len(),
            "Stage run complete"
        );
        Ok(outcomes)
    }

    /// Run a closure as a stage job.
    pub async fn run_with<F, Fut>(
        &self,
        predicate: StagePredicate,
        batch_size: usize,
        process: F,
    ) -> Result<Vec<ItemOutcome>, StoreError>
    where
        F: Fn(Item) -> Fut + Send + Sync,
        Fut: Future<Output = Result<StagePayload, StageError>> + Send,
    {
        let job = FnJob { predicate, process };
        self.run(&job, batch_size).await
    }

    async fn process_item(
        &self,
        job: &dyn StageJob,
        item: &Item,
    ) -> Result<ItemOutcome, StoreError> {
        let stage = job.stage();

        // The store may hand back stale rows; never call out for an item
        // whose inputs are missing or whose stage is already done.
        if item.is_done(stage) {
            tracing::debug!(item_id = %item.id, stage = %stage, "Stage already done, skipping");
            metrics::record_stage_item(stage.as_str(), "skipped");
            return Ok(ItemOutcome::skipped(item.id, "stage already done"));
        }
        if let Some(missing) = item.missing_precursor(stage) {
            tracing::warn!(
                item_id = %item.id,
                stage = %stage,
                missing = missing,
                "Missing precursor, skipping item"
            );
            metrics::record_stage_item(stage.as_str(), "skipped");
            return Ok(ItemOutcome::skipped(
                item.id,
                format!("missing precursor: {}", missing),
            ));
        }

        let payload = match job.process(item).await {
            Ok(payload) => payload,
            Err(StageError::Store(err)) if err.is_fatal() => return Err(err),
            Err(err) => return self.record_failure(item, stage, err).await,
        };

        match self
            .store
            .update_stage(item.id, stage, StageUpdate::Completed(payload))
            .await
        {
            Ok(()) => {
                tracing::info!(item_id = %item.id, stage = %stage, "Item completed stage");
                metrics::record_stage_item(stage.as_str(), "success");
                job.after_recorded(item).await;
                Ok(ItemOutcome::succeeded(item.id))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => self.record_failure(item, stage, err.into()).await,
        }
    }

    async fn record_failure(
        &self,
        item: &Item,
        stage: Stage,
        err: StageError,
    ) -> Result<ItemOutcome, StoreError> {
        let message = err.to_string();
        let (update, status) = if err.is_unconfirmed() {
            tracing::warn!(
                item_id = %item.id,
                stage = %stage,
                error = %message,
                "Outcome unconfirmed, holding item until resolved"
            );
            (StageUpdate::Held(message.clone()), "held")
        } else {
            tracing::warn!(item_id = %item.id, stage = %stage, error = %message, "Item failed stage");
            (StageUpdate::Failed(message.clone()), "failed")
        };
        metrics::record_stage_item(stage.as_str(), status);

        match self.store.update_stage(item.id, stage, update).await {
            Ok(()) => {}
            Err(store_err) if store_err.is_fatal() => return Err(store_err),
            Err(store_err) => {
                tracing::warn!(
                    item_id = %item.id,
                    stage = %stage,
                    error = %store_err,
                    "Failed to record stage error"
                );
            }
        }
        Ok(ItemOutcome::failed(item.id, message))
    }
}

struct FnJob<F> {
    predicate: StagePredicate,
    process: F,
}

#[async_trait]
impl<F, Fut> StageJob for FnJob<F>
where
    F: Fn(Item) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StagePayload, StageError>> + Send,
{
    fn predicate(&self) -> StagePredicate {
        self.predicate
    }

    async fn process(&self, item: &Item) -> Result<StagePayload, StageError> {
        (self.process)(item.clone()).await
    }
}
