//! The concrete stage jobs and the context they share.
//!
//! Every outbound call goes through [`guarded_call`], so all stages get the
//! same cache, retry and rate-limit behavior. Generated media is written
//! through [`MediaStorage`] and only the returned web path is kept on the
//! item.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::runner::StageJob;
use crate::error::{ServiceError, StageError};
use crate::item::{Item, Stage, StagePayload, StagePredicate};
use crate::resilience::{guarded_call, RateLimiters, ResultCache, RetryPolicy};
use crate::services::{
    MediaStorage, ParaphraseResult, PublishRequest, RenderRequest, Services,
};
use crate::store::ItemStore;
use crate::utils::fingerprint::{cache_key, prefix};

/// Characters of the article body that go into the paraphrase cache key.
const PARAPHRASE_KEY_CHARS: usize = 50;
/// Characters of an image prompt that go into the image cache key.
const IMAGE_KEY_CHARS: usize = 400;
/// Characters of the narration that go into the audio cache key.
const AUDIO_KEY_CHARS: usize = 100;

/// Media directories owned by an item, deleted once it is published.
pub fn media_dirs(id: Uuid) -> [String; 3] {
    [
        format!("generated_images/{}", id),
        format!("generated_audio/{}", id),
        format!("generated_video/{}", id),
    ]
}

/// Everything the stages share for the lifetime of the process.
pub struct PipelineContext {
    pub store: Arc<dyn ItemStore>,
    pub services: Services,
    pub limiters: RateLimiters,
    pub paraphrase_cache: ResultCache<ParaphraseResult>,
    /// Generated image and audio bytes, keyed by request fingerprint.
    pub media_cache: ResultCache<Arc<Vec<u8>>>,
    pub retry: RetryPolicy,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(store: Arc<dyn ItemStore>, services: Services, config: PipelineConfig) -> Self {
        Self {
            store,
            services,
            limiters: config.rate_limiters(),
            paraphrase_cache: ResultCache::new("paraphrase", config.cache_config()),
            media_cache: ResultCache::new("media", config.cache_config()),
            retry: config.retry_policy(),
            config,
        }
    }

    /// Drop expired cache entries, returning how many were removed.
    pub fn sweep_caches(&self) -> usize {
        self.paraphrase_cache.sweep() + self.media_cache.sweep()
    }

    /// Delete the generated media of `id`. Failures are logged only.
    pub async fn cleanup_media(&self, id: Uuid) {
        cleanup_media(self.services.storage.as_ref(), id).await;
    }
}

/// Delete the media directories of `id`. Failures are logged, not returned.
pub async fn cleanup_media(storage: &dyn MediaStorage, id: Uuid) {
    let dirs = media_dirs(id);
    let results = join_all(dirs.iter().map(|dir| storage.delete(dir.as_str()))).await;
    let mut failed = 0;
    for (dir, result) in dirs.iter().zip(results) {
        if let Err(err) = result {
            failed += 1;
            tracing::warn!(item_id = %id, dir = %dir, error = %err, "Media cleanup failed");
        }
    }
    if failed == 0 {
        tracing::info!(item_id = %id, "Media cleaned up");
    }
}

/// The job driving `stage`, or `None` for the scrape step.
pub fn job_for(ctx: Arc<PipelineContext>, stage: Stage) -> Option<Box<dyn StageJob>> {
    match stage {
        Stage::Scraped => None,
        Stage::PromptsReady => Some(Box::new(PromptsJob::new(ctx))),
        Stage::ImagesReady => Some(Box::new(ImagesJob::new(ctx))),
        Stage::AudioReady => Some(Box::new(AudioJob::new(ctx))),
        Stage::VideoReady => Some(Box::new(VideoJob::new(ctx))),
        Stage::Published => Some(Box::new(PublishJob::new(ctx))),
    }
}

/// Paraphrases the article and derives hashtags and image prompts.
pub struct PromptsJob {
    ctx: Arc<PipelineContext>,
}

impl PromptsJob {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageJob for PromptsJob {
    fn predicate(&self) -> StagePredicate {
        StagePredicate::NeedsPrompts
    }

    async fn process(&self, item: &Item) -> Result<StagePayload, StageError> {
        let ctx: &PipelineContext = &self.ctx;
        let expected = ctx.config.expected_prompts;
        let title = item.title.as_str();
        let body = item.body.as_str();
        let key = cache_key("paraphrase", &[title, prefix(body, PARAPHRASE_KEY_CHARS)]);

        let generated = guarded_call(
            Some((&ctx.paraphrase_cache, key)),
            &ctx.limiters.paraphrase,
            &ctx.retry,
            move || async move {
                let result = ctx.services.paraphraser.generate(title, body).await?;
                result.validate(expected)?;
                Ok::<_, ServiceError>(result)
            },
        )
        .await;

        let result = match generated {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    item_id = %item.id,
                    error = %err,
                    "Paraphrase failed, passing original text through"
                );
                ParaphraseResult::fallback(title, body, expected)
            }
        };

        let hashtags = if result.hashtags.is_empty() {
            ctx.config.default_hashtags.clone()
        } else {
            result.hashtags
        };
        Ok(StagePayload::Prompts {
            derived_title: result.title,
            derived_text: result.content,
            hashtags,
            image_prompts: result.image_prompts,
        })
    }
}

/// Generates one image per prompt.
pub struct ImagesJob {
    ctx: Arc<PipelineContext>,
}

impl ImagesJob {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageJob for ImagesJob {
    fn predicate(&self) -> StagePredicate {
        StagePredicate::NeedsImages
    }

    async fn process(&self, item: &Item) -> Result<StagePayload, StageError> {
        let ctx: &PipelineContext = &self.ctx;
        let prompts: Vec<&str> = item
            .image_prompts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();

        let mut media_refs = Vec::with_capacity(prompts.len());
        for (index, prompt) in prompts.iter().copied().enumerate() {
            if index > 0 && !ctx.config.image_delay.is_zero() {
                tokio::time::sleep(ctx.config.image_delay).await;
            }
            let number = index + 1;
            let key = cache_key("image", &[prefix(prompt, IMAGE_KEY_CHARS)]);
            let generated = guarded_call(
                Some((&ctx.media_cache, key)),
                &ctx.limiters.image,
                &ctx.retry,
                move || async move {
                    ctx.services
                        .images
                        .generate_image(prompt)
                        .await
                        .map(Arc::new)
                },
            )
            .await;

            let bytes = match generated {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        item_id = %item.id,
                        image = number,
                        error = %err,
                        "Image generation failed, skipping prompt"
                    );
                    continue;
                }
            };

            let path = format!("generated_images/{}/image_{}.png", item.id, number);
            match ctx.services.storage.write(&path, &bytes).await {
                Ok(web_path) => {
                    tracing::debug!(item_id = %item.id, image = number, path = %web_path, "Image stored");
                    media_refs.push(web_path);
                }
                Err(err) => {
                    tracing::warn!(item_id = %item.id, image = number, error = %err, "Failed to store image");
                }
            }
        }

        if media_refs.is_empty() {
            return Err(StageError::NoOutput(format!(
                "none of {} image prompts produced an image",
                prompts.len()
            )));
        }
        tracing::info!(
            item_id = %item.id,
            generated = media_refs.len(),
            prompts = prompts.len(),
            "Images generated"
        );
        Ok(StagePayload::Images { media_refs })
    }
}

/// Synthesizes the narration track.
pub struct AudioJob {
    ctx: Arc<PipelineContext>,
}

impl AudioJob {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageJob for AudioJob {
    fn predicate(&self) -> StagePredicate {
        StagePredicate::NeedsAudio
    }

    async fn process(&self, item: &Item) -> Result<StagePayload, StageError> {
        let ctx: &PipelineContext = &self.ctx;
        let narration = item.narration_text();
        let text = narration.as_str();
        let key = cache_key("audio", &[prefix(text, AUDIO_KEY_CHARS)]);

        let bytes = guarded_call(
            Some((&ctx.media_cache, key)),
            &ctx.limiters.audio,
            &ctx.retry,
            move || async move { ctx.services.audio.generate_audio(text).await.map(Arc::new) },
        )
        .await?;

        let path = format!("generated_audio/{}/audio.wav", item.id);
        let audio_ref = ctx.services.storage.write(&path, &bytes).await?;
        Ok(StagePayload::Audio { audio_ref })
    }
}

/// Renders images and narration into a video.
pub struct VideoJob {
    ctx: Arc<PipelineContext>,
}

impl VideoJob {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageJob for VideoJob {
    fn predicate(&self) -> StagePredicate {
        StagePredicate::NeedsVideo
    }

    async fn process(&self, item: &Item) -> Result<StagePayload, StageError> {
        let ctx: &PipelineContext = &self.ctx;
        let audio_ref = item
            .audio_ref
            .clone()
            .ok_or_else(|| StageError::Precursor("audio_ref".to_string()))?;
        if item.media_refs.is_empty() {
            return Err(StageError::Precursor("media_refs".to_string()));
        }

        let request = RenderRequest {
            title: item.display_title().to_string(),
            content: item.display_text().to_string(),
            image_refs: item.media_refs.clone(),
            audio_ref,
        };
        let request = &request;
        let bytes = guarded_call::<Vec<u8>, _, _>(
            None,
            &ctx.limiters.video,
            &ctx.retry,
            move || async move { ctx.services.video.render(request).await },
        )
        .await?;

        let path = format!(
            "generated_video/{}/{}.mp4",
            item.id,
            Utc::now().timestamp_millis()
        );
        let video_ref = ctx.services.storage.write(&path, &bytes).await?;
        Ok(StagePayload::Video { video_ref })
    }
}

/// Posts the video, then removes the item's generated media.
///
/// Publishing gets a single attempt per cycle. An unconfirmed outcome puts
/// the item on hold instead of retrying, so a post is never duplicated.
pub struct PublishJob {
    ctx: Arc<PipelineContext>,
}

impl PublishJob {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageJob for PublishJob {
    fn predicate(&self) -> StagePredicate {
        StagePredicate::NeedsPublish
    }

    async fn process(&self, item: &Item) -> Result<StagePayload, StageError> {
        let ctx: &PipelineContext = &self.ctx;
        let video_ref = item
            .video_ref
            .clone()
            .ok_or_else(|| StageError::Precursor("video_ref".to_string()))?;
        let hashtags = if item.hashtags.is_empty() {
            ctx.config.default_hashtags.clone()
        } else {
            item.hashtags.clone()
        };

        let request = PublishRequest {
            video_ref,
            caption: item.display_text().to_string(),
            hashtags,
        };
        let request = &request;
        guarded_call::<(), _, _>(
            None,
            &ctx.limiters.publish,
            &RetryPolicy::once(),
            move || async move { ctx.services.publisher.publish(request).await },
        )
        .await?;

        tracing::info!(item_id = %item.id, "Video published");
        Ok(StagePayload::Published)
    }

    async fn after_recorded(&self, item: &Item) {
        self.ctx.cleanup_media(item.id).await;
    }
}
