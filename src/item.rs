//! Item and stage model.
//!
//! An [`Item`] is one scraped news article moving through the pipeline. Its
//! progress is persisted as one [`StageFlag`] per stage; the ordered
//! [`Stage`] enum is derived from those flags and drives the eligibility
//! predicates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Pipeline stages in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scraped,
    PromptsReady,
    ImagesReady,
    AudioReady,
    VideoReady,
    Published,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Scraped,
        Stage::PromptsReady,
        Stage::ImagesReady,
        Stage::AudioReady,
        Stage::VideoReady,
        Stage::Published,
    ];

    /// Stages driven by the stage runner (everything after scraping).
    pub const PROCESSING: [Stage; 5] = [
        Stage::PromptsReady,
        Stage::ImagesReady,
        Stage::AudioReady,
        Stage::VideoReady,
        Stage::Published,
    ];

    /// Short name used in logs, metrics and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scraped => "scrape",
            Stage::PromptsReady => "prompts",
            Stage::ImagesReady => "images",
            Stage::AudioReady => "audio",
            Stage::VideoReady => "video",
            Stage::Published => "publish",
        }
    }

    /// The stage that must be complete before this one may run.
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Scraped => None,
            Stage::PromptsReady => Some(Stage::Scraped),
            Stage::ImagesReady => Some(Stage::PromptsReady),
            Stage::AudioReady => Some(Stage::ImagesReady),
            Stage::VideoReady => Some(Stage::AudioReady),
            Stage::Published => Some(Stage::VideoReady),
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Scraped => Some(Stage::PromptsReady),
            Stage::PromptsReady => Some(Stage::ImagesReady),
            Stage::ImagesReady => Some(Stage::AudioReady),
            Stage::AudioReady => Some(Stage::VideoReady),
            Stage::VideoReady => Some(Stage::Published),
            Stage::Published => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scrape" | "scraped" => Ok(Stage::Scraped),
            "prompts" | "paraphrase" | "prompts_ready" => Ok(Stage::PromptsReady),
            "images" | "image" | "images_ready" => Ok(Stage::ImagesReady),
            "audio" | "audio_ready" => Ok(Stage::AudioReady),
            "video" | "video_ready" => Ok(Stage::VideoReady),
            "publish" | "published" => Ok(Stage::Published),
            other => Err(format!(
                "unknown stage '{}', expected one of: scrape, prompts, images, audio, video, publish",
                other
            )),
        }
    }
}

/// Completion state of one stage for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlag {
    /// Set once the stage completed; never reset by the pipeline.
    pub done: bool,
    /// Error of the most recent failed attempt, cleared on completion.
    pub last_error: Option<String>,
    /// Excluded from eligibility until an operator releases it.
    #[serde(default)]
    pub held: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StageFlag {
    fn completed(at: DateTime<Utc>) -> Self {
        Self {
            done: true,
            last_error: None,
            held: false,
            updated_at: Some(at),
        }
    }
}

/// Per-stage flags of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub scraped: StageFlag,
    pub prompts_ready: StageFlag,
    pub image_done: StageFlag,
    pub audio_done: StageFlag,
    pub video_done: StageFlag,
    pub published: StageFlag,
}

impl StageFlags {
    pub fn get(&self, stage: Stage) -> &StageFlag {
        match stage {
            Stage::Scraped => &self.scraped,
            Stage::PromptsReady => &self.prompts_ready,
            Stage::ImagesReady => &self.image_done,
            Stage::AudioReady => &self.audio_done,
            Stage::VideoReady => &self.video_done,
            Stage::Published => &self.published,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageFlag {
        match stage {
            Stage::Scraped => &mut self.scraped,
            Stage::PromptsReady => &mut self.prompts_ready,
            Stage::ImagesReady => &mut self.image_done,
            Stage::AudioReady => &mut self.audio_done,
            Stage::VideoReady => &mut self.video_done,
            Stage::Published => &mut self.published,
        }
    }
}

/// A scraped article about to be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    /// Normalized source link, the dedup key.
    pub source_link: String,
    pub source: Option<String>,
    pub title: String,
    pub body: String,
    pub posted_date: Option<String>,
}

/// One news article and its progress through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub source_link: String,
    pub source: Option<String>,
    pub title: String,
    pub body: String,
    pub posted_date: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub derived_title: Option<String>,
    pub derived_text: Option<String>,
    pub hashtags: Vec<String>,
    pub image_prompts: Vec<String>,
    pub media_refs: Vec<String>,
    pub audio_ref: Option<String>,
    pub video_ref: Option<String>,
    pub flags: StageFlags,
}

impl Item {
    /// Create a freshly scraped item with a new id.
    pub fn scraped(new: NewItem, now: DateTime<Utc>) -> Self {
        let mut flags = StageFlags::default();
        flags.scraped = StageFlag::completed(now);
        Self {
            id: Uuid::new_v4(),
            source_link: new.source_link,
            source: new.source,
            title: new.title,
            body: new.body,
            posted_date: new.posted_date,
            scraped_at: now,
            derived_title: None,
            derived_text: None,
            hashtags: Vec::new(),
            image_prompts: Vec::new(),
            media_refs: Vec::new(),
            audio_ref: None,
            video_ref: None,
            flags,
        }
    }

    /// Furthest stage reached without gaps.
    pub fn stage(&self) -> Stage {
        let mut reached = Stage::Scraped;
        for stage in Stage::PROCESSING {
            if !self.flags.get(stage).done {
                break;
            }
            reached = stage;
        }
        reached
    }

    pub fn is_done(&self, stage: Stage) -> bool {
        self.flags.get(stage).done
    }

    /// Title to present downstream, preferring the paraphrased one.
    pub fn display_title(&self) -> &str {
        self.derived_title.as_deref().unwrap_or(&self.title)
    }

    /// Body to present downstream, preferring the paraphrased one.
    pub fn display_text(&self) -> &str {
        self.derived_text.as_deref().unwrap_or(&self.body)
    }

    /// Text read out by the narration track.
    pub fn narration_text(&self) -> String {
        format!("{}.\n {}", self.display_title(), self.display_text())
    }

    /// Names the first input `stage` needs that this item does not have.
    ///
    /// Checks the preceding flag and the concrete data the stage consumes.
    pub fn missing_precursor(&self, stage: Stage) -> Option<&'static str> {
        if let Some(previous) = stage.previous() {
            if !self.is_done(previous) {
                return Some(match previous {
                    Stage::Scraped => "scraped flag",
                    Stage::PromptsReady => "prompts_ready flag",
                    Stage::ImagesReady => "image_done flag",
                    Stage::AudioReady => "audio_done flag",
                    Stage::VideoReady => "video_done flag",
                    Stage::Published => "published flag",
                });
            }
        }
        match stage {
            Stage::ImagesReady if self.image_prompts.is_empty() => Some("image_prompts"),
            Stage::AudioReady if self.display_text().trim().is_empty() => Some("derived_text"),
            Stage::VideoReady if self.media_refs.is_empty() => Some("media_refs"),
            Stage::VideoReady if self.audio_ref.is_none() => Some("audio_ref"),
            Stage::Published if self.video_ref.is_none() => Some("video_ref"),
            _ => None,
        }
    }

    /// Apply a stage update in place.
    ///
    /// Completion merges the payload, clears `last_error` and stamps
    /// `updated_at`. Failures only touch flags that are not done yet.
    pub fn apply(
        &mut self,
        stage: Stage,
        update: StageUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match update {
            StageUpdate::Completed(payload) => {
                if payload.stage() != stage {
                    return Err(StoreError::PayloadMismatch {
                        stage: stage.to_string(),
                        payload: payload.stage().to_string(),
                    });
                }
                let mut merged = self.clone();
                payload.merge_into(&mut merged);
                if let Some(missing) = merged.missing_precursor(stage) {
                    return Err(StoreError::PrecursorMissing {
                        stage: stage.to_string(),
                        missing: missing.to_string(),
                    });
                }
                *merged.flags.get_mut(stage) = StageFlag::completed(now);
                *self = merged;
            }
            StageUpdate::Failed(error) => {
                let flag = self.flags.get_mut(stage);
                if !flag.done {
                    flag.last_error = Some(error);
                    flag.updated_at = Some(now);
                }
            }
            StageUpdate::Held(error) => {
                let flag = self.flags.get_mut(stage);
                if !flag.done {
                    flag.last_error = Some(error);
                    flag.held = true;
                    flag.updated_at = Some(now);
                }
            }
            StageUpdate::Released => {
                let flag = self.flags.get_mut(stage);
                flag.held = false;
                flag.last_error = None;
                flag.updated_at = Some(now);
            }
        }
        Ok(())
    }
}

/// Data produced by a stage, merged into the item on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagePayload {
    Prompts {
        derived_title: String,
        derived_text: String,
        hashtags: Vec<String>,
        image_prompts: Vec<String>,
    },
    Images {
        media_refs: Vec<String>,
    },
    Audio {
        audio_ref: String,
    },
    Video {
        video_ref: String,
    },
    Published,
}

impl StagePayload {
    /// Stage this payload completes.
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Prompts { .. } => Stage::PromptsReady,
            StagePayload::Images { .. } => Stage::ImagesReady,
            StagePayload::Audio { .. } => Stage::AudioReady,
            StagePayload::Video { .. } => Stage::VideoReady,
            StagePayload::Published => Stage::Published,
        }
    }

    fn merge_into(self, item: &mut Item) {
        match self {
            StagePayload::Prompts {
                derived_title,
                derived_text,
                hashtags,
                image_prompts,
            } => {
                item.derived_title = Some(derived_title);
                item.derived_text = Some(derived_text);
                item.hashtags = hashtags;
                item.image_prompts = image_prompts;
            }
            StagePayload::Images { media_refs } => item.media_refs = media_refs,
            StagePayload::Audio { audio_ref } => item.audio_ref = Some(audio_ref),
            StagePayload::Video { video_ref } => item.video_ref = Some(video_ref),
            StagePayload::Published => {}
        }
    }
}

/// A write against one stage flag of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageUpdate {
    /// Stage succeeded: merge payload, set the flag, clear the error.
    Completed(StagePayload),
    /// Stage failed this run; the item stays eligible.
    Failed(String),
    /// Outcome unknown; the item is parked until an operator releases it.
    Held(String),
    /// Clear a hold so the item becomes eligible again.
    Released,
}

/// Named eligibility filters, one per processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePredicate {
    NeedsPrompts,
    NeedsImages,
    NeedsAudio,
    NeedsVideo,
    NeedsPublish,
}

impl StagePredicate {
    pub const ALL: [StagePredicate; 5] = [
        StagePredicate::NeedsPrompts,
        StagePredicate::NeedsImages,
        StagePredicate::NeedsAudio,
        StagePredicate::NeedsVideo,
        StagePredicate::NeedsPublish,
    ];

    /// The predicate selecting items ready for `stage`, if it is a processing stage.
    pub fn for_stage(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Scraped => None,
            Stage::PromptsReady => Some(StagePredicate::NeedsPrompts),
            Stage::ImagesReady => Some(StagePredicate::NeedsImages),
            Stage::AudioReady => Some(StagePredicate::NeedsAudio),
            Stage::VideoReady => Some(StagePredicate::NeedsVideo),
            Stage::Published => Some(StagePredicate::NeedsPublish),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StagePredicate::NeedsPrompts => Stage::PromptsReady,
            StagePredicate::NeedsImages => Stage::ImagesReady,
            StagePredicate::NeedsAudio => Stage::AudioReady,
            StagePredicate::NeedsVideo => Stage::VideoReady,
            StagePredicate::NeedsPublish => Stage::Published,
        }
    }

    /// Own flag not done, not held, and every precursor present.
    pub fn matches(&self, item: &Item) -> bool {
        let stage = self.stage();
        let flag = item.flags.get(stage);
        !flag.done && !flag.held && item.missing_precursor(stage).is_none()
    }
}

impl fmt::Display for StagePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StagePredicate::NeedsPrompts => "needs_prompts",
            StagePredicate::NeedsImages => "needs_images",
            StagePredicate::NeedsAudio => "needs_audio",
            StagePredicate::NeedsVideo => "needs_video",
            StagePredicate::NeedsPublish => "needs_publish",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Item {
        Item::scraped(
            NewItem {
                source_link: "https://news.example/1".into(),
                source: Some("news.example".into()),
                title: "Title".into(),
                body: "Body".into(),
                posted_date: None,
            },
            Utc::now(),
        )
    }

    fn prompts_payload() -> StagePayload {
        StagePayload::Prompts {
            derived_title: "New title".into(),
            derived_text: "New text".into(),
            hashtags: vec!["#news".into()],
            image_prompts: vec!["a river at dawn".into()],
        }
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Scraped < Stage::PromptsReady);
        assert!(Stage::VideoReady < Stage::Published);
        assert_eq!(Stage::ImagesReady.previous(), Some(Stage::PromptsReady));
        assert_eq!(Stage::Published.next(), None);
        assert_eq!("images".parse::<Stage>(), Ok(Stage::ImagesReady));
        assert!("rendering".parse::<Stage>().is_err());
    }

    #[test]
    fn test_new_item_is_scraped() {
        let item = sample();
        assert!(item.is_done(Stage::Scraped));
        assert_eq!(item.stage(), Stage::Scraped);
        assert!(StagePredicate::NeedsPrompts.matches(&item));
        assert!(!StagePredicate::NeedsImages.matches(&item));
    }

    #[test]
    fn test_completion_clears_error() {
        let mut item = sample();
        let now = Utc::now();
        item.apply(Stage::PromptsReady, StageUpdate::Failed("timeout".into()), now)
            .unwrap();
        assert_eq!(
            item.flags.prompts_ready.last_error.as_deref(),
            Some("timeout")
        );
        assert!(!item.flags.prompts_ready.done);

        item.apply(
            Stage::PromptsReady,
            StageUpdate::Completed(prompts_payload()),
            now,
        )
        .unwrap();
        assert!(item.flags.prompts_ready.done);
        assert!(item.flags.prompts_ready.last_error.is_none());
        assert_eq!(item.derived_title.as_deref(), Some("New title"));
        assert_eq!(item.stage(), Stage::PromptsReady);
    }

    #[test]
    fn test_flags_are_monotonic() {
        let mut item = sample();
        let now = Utc::now();
        item.apply(
            Stage::PromptsReady,
            StageUpdate::Completed(prompts_payload()),
            now,
        )
        .unwrap();
        item.apply(Stage::PromptsReady, StageUpdate::Failed("late".into()), now)
            .unwrap();
        assert!(item.flags.prompts_ready.done);
        assert!(item.flags.prompts_ready.last_error.is_none());
    }

    #[test]
    fn test_video_requires_media_and_audio() {
        let mut item = sample();
        let now = Utc::now();
        item.flags.prompts_ready.done = true;
        item.flags.image_done.done = true;
        item.flags.audio_done.done = true;
        item.audio_ref = Some("/generated_audio/x/audio.wav".into());

        assert_eq!(item.missing_precursor(Stage::VideoReady), Some("media_refs"));
        assert!(!StagePredicate::NeedsVideo.matches(&item));

        let err = item
            .apply(
                Stage::VideoReady,
                StageUpdate::Completed(StagePayload::Video {
                    video_ref: "/v.mp4".into(),
                }),
                now,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::PrecursorMissing { .. }));
        assert!(!item.flags.video_done.done);
        assert!(item.video_ref.is_none());
    }

    #[test]
    fn test_payload_must_match_stage() {
        let mut item = sample();
        let err = item
            .apply(
                Stage::ImagesReady,
                StageUpdate::Completed(StagePayload::Audio {
                    audio_ref: "/a.wav".into(),
                }),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::PayloadMismatch { .. }));
    }

    #[test]
    fn test_hold_and_release() {
        let mut item = sample();
        item.flags.prompts_ready.done = true;
        item.flags.image_done.done = true;
        item.flags.audio_done.done = true;
        item.flags.video_done.done = true;
        item.media_refs = vec!["/i.png".into()];
        item.audio_ref = Some("/a.wav".into());
        item.video_ref = Some("/v.mp4".into());
        assert!(StagePredicate::NeedsPublish.matches(&item));

        let now = Utc::now();
        item.apply(Stage::Published, StageUpdate::Held("no ack".into()), now)
            .unwrap();
        assert!(!StagePredicate::NeedsPublish.matches(&item));

        item.apply(Stage::Published, StageUpdate::Released, now)
            .unwrap();
        assert!(StagePredicate::NeedsPublish.matches(&item));
        assert!(item.flags.published.last_error.is_none());
    }

    #[test]
    fn test_narration_text() {
        let mut item = sample();
        assert_eq!(item.narration_text(), "Title.\n Body");
        item.derived_title = Some("T".into());
        item.derived_text = Some("C".into());
        assert_eq!(item.narration_text(), "T.\n C");
    }
}
