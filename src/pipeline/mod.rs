//! The news-to-video pipeline.
//!
//! # Architecture
//!
//! - **Config**: batch sizes, pacing, retry, cache and rate-limit policy
//! - **Runner**: the per-item loop shared by every stage
//! - **Stages**: prompts, images, audio, video and publish jobs
//! - **Orchestrator**: one cycle over all stages, never two at once
//! - **Scheduler**: triggers cycles at startup and on a fixed period
//!
//! # Pipeline Flow
//!
//! 1. **Scrape**: new articles are deduplicated by normalized link and stored
//! 2. **Prompts**: the article is paraphrased into a title, text, hashtags and image prompts
//! 3. **Images**: one image per prompt
//! 4. **Audio**: narration of the paraphrased title and text
//! 5. **Video**: images and narration rendered into a video
//! 6. **Publish**: the video is posted, then the item's media files are deleted
//!
//! Every stage is gated by a flag on the item, so a cycle interrupted at any
//! point resumes where it left off.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use newsreel::pipeline::{Orchestrator, PipelineConfig};
//! use newsreel::store::SqliteItemStore;
//!
//! let config = PipelineConfig::from_env()?;
//! let store = Arc::new(SqliteItemStore::open(&config.database_url).await?);
//! let orchestrator = Orchestrator::new(store, services, config);
//!
//! if let Some(report) = orchestrator.run_cycle().await {
//!     println!("created {} items", report.scraped.map(|s| s.created).unwrap_or(0));
//! }
//! ```

pub mod config;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;
pub mod stages;

pub use config::{ConfigError, PipelineConfig, StageSettings};
pub use orchestrator::{
    resolve_publish, to_new_item, CycleReport, Orchestrator, PublishResolution, ScrapeSummary,
    StageReport,
};
pub use runner::{ItemOutcome, StageJob, StageRunner};
pub use scheduler::Scheduler;
pub use stages::{
    cleanup_media, job_for, media_dirs, AudioJob, ImagesJob, PipelineContext, PromptsJob,
    PublishJob, VideoJob,
};
