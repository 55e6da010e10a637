//! External collaborators.
//!
//! The pipeline talks to the outside world only through the traits in this
//! module, so every collaborator can be replaced by a test double:
//!
//! - [`Scraper`]: discovers new articles
//! - [`Paraphraser`]: rewrites an article and proposes hashtags and image prompts
//! - [`ImageGenerator`], [`AudioGenerator`], [`VideoRenderer`]: produce media bytes
//! - [`MediaStorage`]: persists media and hands back web-accessible references
//! - [`Publisher`]: posts the finished video
//!
//! HTTP-backed implementations live in [`http`] and [`paraphrase`]; the
//! filesystem storage lives in [`storage`].

pub mod http;
pub mod paraphrase;
pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub use http::{HttpMediaService, HttpPublisher, HttpScraper};
pub use paraphrase::LlmParaphraser;
pub use storage::FsStorage;

/// Placeholder used when no image prompt could be generated.
pub const PLACEHOLDER_PROMPT: &str = "No prompt generated due to error";

/// An article as returned by the scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    pub link: String,
    pub content: String,
    #[serde(default, alias = "postedDate")]
    pub posted_date: Option<String>,
}

/// Output of the paraphrase service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParaphraseResult {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub image_prompts: Vec<String>,
}

impl ParaphraseResult {
    /// Check the response shape the downstream stages depend on.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidResponse`] when text is empty or the
    /// number of image prompts differs from `expected_prompts`.
    pub fn validate(&self, expected_prompts: usize) -> Result<(), ServiceError> {
        if self.title.trim().is_empty() || self.content.trim().is_empty() {
            return Err(ServiceError::InvalidResponse(
                "empty title or content".to_string(),
            ));
        }
        let prompts = self
            .image_prompts
            .iter()
            .filter(|p| !p.trim().is_empty())
            .count();
        if prompts != expected_prompts {
            return Err(ServiceError::InvalidResponse(format!(
                "expected {} image prompts, got {}",
                expected_prompts, prompts
            )));
        }
        Ok(())
    }

    /// Pass-through result used when paraphrasing failed permanently.
    pub fn fallback(title: &str, content: &str, prompt_count: usize) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
            hashtags: Vec::new(),
            image_prompts: vec![PLACEHOLDER_PROMPT.to_string(); prompt_count],
        }
    }
}

/// Inputs for rendering one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRequest {
    pub title: String,
    pub content: String,
    pub image_refs: Vec<String>,
    pub audio_ref: String,
}

/// A finished video ready to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishRequest {
    pub video_ref: String,
    pub caption: String,
    pub hashtags: Vec<String>,
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape_news(&self) -> Result<Vec<RawArticle>, ServiceError>;
}

#[async_trait]
pub trait Paraphraser: Send + Sync {
    async fn generate(&self, title: &str, content: &str) -> Result<ParaphraseResult, ServiceError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image for `prompt`, returning the encoded image bytes.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ServiceError>;
}

#[async_trait]
pub trait AudioGenerator: Send + Sync {
    /// Synthesize speech for `text`, returning WAV bytes.
    async fn generate_audio(&self, text: &str) -> Result<Vec<u8>, ServiceError>;
}

#[async_trait]
pub trait VideoRenderer: Send + Sync {
    /// Render a video, returning MP4 bytes.
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ServiceError>;
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Store `bytes` under the relative `path`, returning its web path.
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<String, ServiceError>;

    /// Delete the relative directory `path` and everything below it.
    /// Missing directories are not an error.
    async fn delete(&self, path: &str) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Post the video. [`ServiceError::Unconfirmed`] means the post may exist.
    async fn publish(&self, request: &PublishRequest) -> Result<(), ServiceError>;
}

/// Every collaborator the pipeline needs, passed in explicitly.
#[derive(Clone)]
pub struct Services {
    pub scraper: Arc<dyn Scraper>,
    pub paraphraser: Arc<dyn Paraphraser>,
    pub images: Arc<dyn ImageGenerator>,
    pub audio: Arc<dyn AudioGenerator>,
    pub video: Arc<dyn VideoRenderer>,
    pub storage: Arc<dyn MediaStorage>,
    pub publisher: Arc<dyn Publisher>,
}
