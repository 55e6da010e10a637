//! Pipeline orchestrator.
//!
//! A cycle scrapes new articles, then runs every processing stage once in
//! the fixed order prompts, images, audio, video, publish. Cleanup of an
//! item's media happens inside the publish stage once the published flag is
//! recorded. An orchestrator runs at most one cycle at a time: a trigger that
//! arrives while a cycle is in progress is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::runner::{ItemOutcome, StageRunner};
use super::stages::{cleanup_media, job_for, PipelineContext};
use crate::error::StoreError;
use crate::item::{NewItem, Stage, StagePayload, StageUpdate};
use crate::metrics;
use crate::resilience::guarded_call;
use crate::services::{MediaStorage, RawArticle, Services};
use crate::store::ItemStore;
use crate::utils::fingerprint::{normalize_url, source_host};

/// Counts from the scrape step of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    /// Articles returned by the scraper.
    pub fetched: usize,
    /// New items stored.
    pub created: usize,
    /// Articles whose link was already stored.
    pub duplicates: usize,
    /// Articles with missing text or an unusable link.
    pub rejected: usize,
    /// Set when the scraper or the store failed.
    pub error: Option<String>,
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcomes: Vec<ItemOutcome>,
    /// Store failure that ended the run early.
    pub fatal_error: Option<String>,
}

impl StageReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.success && !o.skipped)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.skipped).count()
    }
}

/// Result of one orchestrator cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// `None` when the cycle did not include the scrape step.
    pub scraped: Option<ScrapeSummary>,
    pub stages: Vec<StageReport>,
}

impl CycleReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}

/// How an operator settles a held publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResolution {
    /// The post exists: mark the item published and clean up its media.
    Posted,
    /// The post does not exist: make the item eligible for publishing again.
    Retry,
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Drives the stages in order over a shared [`PipelineContext`].
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ItemStore>, services: Services, config: PipelineConfig) -> Self {
        Self::from_context(Arc::new(PipelineContext::new(store, services, config)))
    }

    pub fn from_context(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            running: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// True while a cycle is executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a full cycle: scrape, then every processing stage.
    ///
    /// Returns `None` when another cycle is still running.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        self.run_stages(&Stage::ALL).await
    }

    /// Run the given stages once, in pipeline order.
    ///
    /// Returns `None` when another cycle is still running.
    pub async fn run_stages(&self, stages: &[Stage]) -> Option<CycleReport> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            tracing::warn!("Previous cycle still running, skipping this trigger");
            metrics::record_cycle_skipped();
            return None;
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let mut ordered = stages.to_vec();
        ordered.sort();
        ordered.dedup();
        tracing::info!(stages = ordered.len(), "Pipeline cycle started");

        let mut scraped = None;
        let mut reports = Vec::new();
        for stage in ordered {
            if stage == Stage::Scraped {
                scraped = Some(self.scrape().await);
            } else {
                reports.push(self.execute_stage(stage).await);
            }
        }

        let duration = start.elapsed();
        metrics::record_cycle_completed(duration);
        tracing::info!(
            duration_ms = duration.as_millis() as u64,
            created = scraped.as_ref().map(|s| s.created).unwrap_or(0),
            succeeded = reports.iter().map(StageReport::succeeded).sum::<usize>(),
            failed = reports.iter().map(StageReport::failed).sum::<usize>(),
            "Pipeline cycle finished"
        );

        Some(CycleReport {
            started_at,
            duration,
            scraped,
            stages: reports,
        })
    }

    async fn execute_stage(&self, stage: Stage) -> StageReport {
        let job = job_for(self.ctx.clone(), stage);
        let settings = self.ctx.config.stage(stage);
        let (Some(job), Some(settings)) = (job, settings) else {
            return StageReport {
                stage,
                outcomes: Vec::new(),
                fatal_error: None,
            };
        };

        let runner = StageRunner::new(self.ctx.store.clone(), settings.item_delay);
        match runner.run(job.as_ref(), settings.batch_size).await {
            Ok(outcomes) => StageReport {
                stage,
                outcomes,
                fatal_error: None,
            },
            Err(err) => {
                tracing::error!(stage = %stage, error = %err, "Stage aborted by store failure");
                StageReport {
                    stage,
                    outcomes: Vec::new(),
                    fatal_error: Some(err.to_string()),
                }
            }
        }
    }

    /// Fetch new articles and store the ones not seen before.
    pub async fn scrape(&self) -> ScrapeSummary {
        let ctx: &PipelineContext = &self.ctx;
        let mut summary = ScrapeSummary::default();

        let articles = match guarded_call::<Vec<RawArticle>, _, _>(
            None,
            &ctx.limiters.scraper,
            &ctx.retry,
            move || async move { ctx.services.scraper.scrape_news().await },
        )
        .await
        {
            Ok(articles) => articles,
            Err(err) => {
                tracing::warn!(error = %err, "Scrape failed");
                summary.error = Some(err.to_string());
                return summary;
            }
        };
        summary.fetched = articles.len();

        for article in articles {
            if summary.created >= ctx.config.scrape_limit {
                tracing::debug!(limit = ctx.config.scrape_limit, "Scrape limit reached");
                break;
            }
            let new_item = match to_new_item(article) {
                Ok(new_item) => new_item,
                Err(reason) => {
                    tracing::debug!(reason = %reason, "Rejected scraped article");
                    metrics::record_stage_item(Stage::Scraped.as_str(), "rejected");
                    summary.rejected += 1;
                    continue;
                }
            };

            let link = new_item.source_link.clone();
            match ctx.store.create_if_absent(new_item).await {
                Ok(outcome) if outcome.created => {
                    tracing::info!(item_id = %outcome.id, link = %link, "New item stored");
                    metrics::record_stage_item(Stage::Scraped.as_str(), "created");
                    summary.created += 1;
                }
                Ok(_) => {
                    tracing::debug!(link = %link, "Duplicate article skipped");
                    metrics::record_stage_item(Stage::Scraped.as_str(), "duplicate");
                    summary.duplicates += 1;
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(error = %err, "Store failure during scrape");
                    summary.error = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    tracing::warn!(link = %link, error = %err, "Failed to store article");
                    summary.rejected += 1;
                }
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            created = summary.created,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            "Scrape complete"
        );
        summary
    }

    /// Settle an item whose publish outcome was unconfirmed.
    ///
    /// # Errors
    ///
    /// See [`resolve_publish`].
    pub async fn resolve_publish(
        &self,
        id: Uuid,
        resolution: PublishResolution,
    ) -> Result<(), StoreError> {
        resolve_publish(
            self.ctx.store.as_ref(),
            self.ctx.services.storage.as_ref(),
            id,
            resolution,
        )
        .await
    }

    /// Drop expired cache entries.
    pub fn sweep_caches(&self) -> usize {
        let removed = self.ctx.sweep_caches();
        tracing::debug!(removed = removed, "Cache sweep complete");
        removed
    }
}

/// Settle an item whose publish outcome was unconfirmed.
///
/// `Posted` marks the item published and deletes its media; `Retry` clears
/// the hold so the next cycle publishes it again.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] for an unknown id, or the store error
/// of the update.
pub async fn resolve_publish(
    store: &dyn ItemStore,
    storage: &dyn MediaStorage,
    id: Uuid,
    resolution: PublishResolution,
) -> Result<(), StoreError> {
    let item = store.get(id).await?.ok_or(StoreError::NotFound(id))?;
    if !item.flags.published.held {
        tracing::warn!(item_id = %id, "Item is not held, resolving anyway");
    }

    match resolution {
        PublishResolution::Posted => {
            store
                .update_stage(
                    id,
                    Stage::Published,
                    StageUpdate::Completed(StagePayload::Published),
                )
                .await?;
            tracing::info!(item_id = %id, "Publish confirmed by operator");
            cleanup_media(storage, id).await;
        }
        PublishResolution::Retry => {
            store
                .update_stage(id, Stage::Published, StageUpdate::Released)
                .await?;
            tracing::info!(item_id = %id, "Publish hold released");
        }
    }
    Ok(())
}

/// Validate a scraped article and normalize its link.
pub fn to_new_item(article: RawArticle) -> Result<NewItem, String> {
    let title = article.title.trim();
    let body = article.content.trim();
    if title.is_empty() {
        return Err(format!("empty title for {}", article.link));
    }
    if body.is_empty() {
        return Err(format!("empty content for {}", article.link));
    }
    let source_link = normalize_url(&article.link)?;
    Ok(NewItem {
        source: source_host(&source_link),
        source_link,
        title: title.to_string(),
        body: body.to_string(),
        posted_date: article.posted_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, link: &str, content: &str) -> RawArticle {
        RawArticle {
            title: title.into(),
            link: link.into(),
            content: content.into(),
            posted_date: Some("2024-05-01".into()),
        }
    }

    #[test]
    fn test_to_new_item_normalizes_link() {
        let item = to_new_item(article(
            " Flood warning ",
            "https://www.news.example/story/?utm_source=fb#top",
            "Rivers rising.",
        ))
        .unwrap();
        assert_eq!(item.source_link, "https://www.news.example/story");
        assert_eq!(item.source.as_deref(), Some("news.example"));
        assert_eq!(item.title, "Flood warning");
        assert_eq!(item.posted_date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_to_new_item_rejects_incomplete_articles() {
        assert!(to_new_item(article("", "https://x/1", "body")).is_err());
        assert!(to_new_item(article("title", "https://x/1", "  ")).is_err());
        assert!(to_new_item(article("title", "not a link", "body")).is_err());
    }

    #[test]
    fn test_cycle_guard_is_exclusive() {
        let running = AtomicBool::new(false);
        let guard = CycleGuard::acquire(&running);
        assert!(guard.is_some());
        assert!(CycleGuard::acquire(&running).is_none());
        drop(guard);
        assert!(CycleGuard::acquire(&running).is_some());
    }

    #[test]
    fn test_stage_report_counts() {
        let report = StageReport {
            stage: Stage::ImagesReady,
            outcomes: vec![
                ItemOutcome {
                    item_id: Uuid::new_v4(),
                    success: true,
                    skipped: false,
                    error: None,
                },
                ItemOutcome {
                    item_id: Uuid::new_v4(),
                    success: false,
                    skipped: false,
                    error: Some("timeout".into()),
                },
                ItemOutcome {
                    item_id: Uuid::new_v4(),
                    success: false,
                    skipped: true,
                    error: Some("missing precursor: image_prompts".into()),
                },
            ],
            fatal_error: None,
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
    }
}
