//! newsreel: resumable news-to-video pipeline.
//!
//! Scraped articles are stored as items and moved through a fixed sequence
//! of stages (paraphrase, images, audio, video, publish). Each stage is
//! recorded per item, every external call goes through the same cache,
//! retry and rate-limit policy, and an interrupted run resumes from the
//! stored flags.

pub mod cli;
pub mod error;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod resilience;
pub mod services;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use error::{RetryError, ServiceError, StageError, StoreError};
pub use item::{Item, NewItem, Stage, StageFlag, StagePayload, StagePredicate, StageUpdate};
pub use pipeline::{CycleReport, Orchestrator, PipelineConfig};
pub use store::{ItemStore, MemoryItemStore, SqliteItemStore};
