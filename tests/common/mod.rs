//! Test doubles for the pipeline's collaborators.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use newsreel::error::{ServiceError, StoreError};
use newsreel::item::{Item, NewItem, StagePredicate, StageUpdate};
use newsreel::pipeline::{Orchestrator, PipelineConfig};
use newsreel::services::{
    AudioGenerator, ImageGenerator, MediaStorage, ParaphraseResult, Paraphraser, PublishRequest,
    Publisher, RawArticle, RenderRequest, Scraper, Services, VideoRenderer,
};
use newsreel::store::{CreateOutcome, ItemStore, MemoryItemStore};

pub fn article(n: usize) -> RawArticle {
    RawArticle {
        title: format!("Headline {}", n),
        link: format!("https://news.example/story/{}", n),
        content: format!("Body of story number {} with enough words to narrate.", n),
        posted_date: None,
    }
}

pub fn new_item(link: &str) -> NewItem {
    NewItem {
        source_link: link.to_string(),
        source: Some("news.example".to_string()),
        title: "Flood warning".to_string(),
        body: "Rivers are rising across the plains.".to_string(),
        posted_date: None,
    }
}

/// An item that has finished the prompts stage with the given image prompts.
pub fn item_with_prompts(link: &str, prompts: &[&str]) -> Item {
    let mut item = Item::scraped(new_item(link), Utc::now());
    item.flags.prompts_ready.done = true;
    item.derived_title = Some("Flood warning".to_string());
    item.derived_text = Some("Rivers are rising.".to_string());
    item.hashtags = vec!["#flood".to_string()];
    item.image_prompts = prompts.iter().map(|p| p.to_string()).collect();
    item
}

/// Zero pacing, fast retries.
pub fn test_config() -> PipelineConfig {
    PipelineConfig::default()
        .without_delays()
        .with_retry(3, Duration::from_millis(10))
}

#[derive(Default)]
pub struct StubScraper {
    pub articles: Mutex<Vec<RawArticle>>,
    pub delay: Mutex<Option<Duration>>,
    pub calls: AtomicU32,
}

impl StubScraper {
    pub fn set_articles(&self, articles: Vec<RawArticle>) {
        *self.articles.lock().unwrap() = articles;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for StubScraper {
    async fn scrape_news(&self) -> Result<Vec<RawArticle>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.articles.lock().unwrap().clone())
    }
}

pub struct StubParaphraser {
    pub prompts: usize,
    pub failing: Mutex<bool>,
    pub calls: AtomicU32,
}

impl Default for StubParaphraser {
    fn default() -> Self {
        Self {
            prompts: 5,
            failing: Mutex::new(false),
            calls: AtomicU32::new(0),
        }
    }
}

impl StubParaphraser {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Paraphraser for StubParaphraser {
    async fn generate(&self, title: &str, content: &str) -> Result<ParaphraseResult, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(ServiceError::Status {
                code: 503,
                message: "model overloaded".to_string(),
            });
        }
        Ok(ParaphraseResult {
            title: format!("Rewritten: {}", title),
            content: format!("Rewritten: {}", content),
            hashtags: vec!["#story".to_string()],
            image_prompts: (1..=self.prompts)
                .map(|i| format!("{} scene {}", title, i))
                .collect(),
        })
    }
}

/// Image, audio and video generator in one. Requests containing
/// `fail_marker` get a permanent rejection.
#[derive(Default)]
pub struct StubMedia {
    pub fail_marker: Mutex<Option<String>>,
    pub image_calls: AtomicU32,
    pub audio_calls: AtomicU32,
    pub video_calls: AtomicU32,
}

impl StubMedia {
    pub fn fail_on(&self, marker: &str) {
        *self.fail_marker.lock().unwrap() = Some(marker.to_string());
    }

    fn check(&self, input: &str) -> Result<(), ServiceError> {
        match self.fail_marker.lock().unwrap().as_deref() {
            Some(marker) if input.contains(marker) => Err(ServiceError::Status {
                code: 400,
                message: format!("rejected: {}", input),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ImageGenerator for StubMedia {
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ServiceError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.check(prompt)?;
        Ok(format!("png:{}", prompt).into_bytes())
    }
}

#[async_trait]
impl AudioGenerator for StubMedia {
    async fn generate_audio(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        self.check(text)?;
        Ok(format!("wav:{}", text).into_bytes())
    }
}

#[async_trait]
impl VideoRenderer for StubMedia {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ServiceError> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&request.title)?;
        Ok(format!("mp4:{}:{}", request.image_refs.len(), request.audio_ref).into_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Succeed,
    Unconfirmed,
    Reject,
}

pub struct StubPublisher {
    pub mode: Mutex<PublishMode>,
    pub requests: Mutex<Vec<PublishRequest>>,
}

impl Default for StubPublisher {
    fn default() -> Self {
        Self {
            mode: Mutex::new(PublishMode::Succeed),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl StubPublisher {
    pub fn set_mode(&self, mode: PublishMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for StubPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<(), ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        let mode = *self.mode.lock().unwrap();
        match mode {
            PublishMode::Succeed => Ok(()),
            PublishMode::Unconfirmed => Err(ServiceError::Unconfirmed(
                "upload timed out after sending".to_string(),
            )),
            PublishMode::Reject => Err(ServiceError::Status {
                code: 503,
                message: "platform unavailable".to_string(),
            }),
        }
    }
}

/// Storage keeping file sizes in memory. `fixed_ref` replaces the web path
/// returned for every write.
#[derive(Default)]
pub struct MemoryStorage {
    pub files: Mutex<BTreeMap<String, usize>>,
    pub deleted: Mutex<Vec<String>>,
    pub fixed_ref: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaStorage for MemoryStorage {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<String, ServiceError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.len());
        let fixed = self.fixed_ref.lock().unwrap().clone();
        Ok(fixed.unwrap_or_else(|| format!("/{}", path)))
    }

    async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        let prefix = format!("{}/", path);
        self.files
            .lock()
            .unwrap()
            .retain(|file, _| !file.starts_with(&prefix));
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// Returns every stored item for every predicate, as a lagging replica would.
pub struct StaleStore {
    pub inner: MemoryItemStore,
}

#[async_trait]
impl ItemStore for StaleStore {
    async fn find_by_stage_predicate(
        &self,
        _predicate: StagePredicate,
    ) -> Result<Vec<Item>, StoreError> {
        self.inner.list().await
    }

    async fn create_if_absent(&self, item: NewItem) -> Result<CreateOutcome, StoreError> {
        self.inner.create_if_absent(item).await
    }

    async fn update_stage(
        &self,
        id: Uuid,
        stage: newsreel::item::Stage,
        update: StageUpdate,
    ) -> Result<(), StoreError> {
        self.inner.update_stage(id, stage, update).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Item>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Item>, StoreError> {
        self.inner.list().await
    }
}

/// Store whose eligibility queries fail as if the database were down.
#[derive(Default)]
pub struct UnreachableStore;

#[async_trait]
impl ItemStore for UnreachableStore {
    async fn find_by_stage_predicate(
        &self,
        _predicate: StagePredicate,
    ) -> Result<Vec<Item>, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn create_if_absent(&self, _item: NewItem) -> Result<CreateOutcome, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn update_stage(
        &self,
        _id: Uuid,
        _stage: newsreel::item::Stage,
        _update: StageUpdate,
    ) -> Result<(), StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<Item>, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn list(&self) -> Result<Vec<Item>, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

/// Every stub, wired into an orchestrator over `store`.
pub struct Harness<S: ItemStore + 'static> {
    pub store: Arc<S>,
    pub scraper: Arc<StubScraper>,
    pub paraphraser: Arc<StubParaphraser>,
    pub media: Arc<StubMedia>,
    pub storage: Arc<MemoryStorage>,
    pub publisher: Arc<StubPublisher>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness<MemoryItemStore> {
    pub fn new() -> Self {
        Self::with_store(MemoryItemStore::new(), test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self::with_store(MemoryItemStore::new(), config)
    }
}

impl<S: ItemStore + 'static> Harness<S> {
    pub fn with_store(store: S, config: PipelineConfig) -> Self {
        let store = Arc::new(store);
        let scraper = Arc::new(StubScraper::default());
        let paraphraser = Arc::new(StubParaphraser::default());
        let media = Arc::new(StubMedia::default());
        let storage = Arc::new(MemoryStorage::default());
        let publisher = Arc::new(StubPublisher::default());

        let services = Services {
            scraper: scraper.clone(),
            paraphraser: paraphraser.clone(),
            images: media.clone(),
            audio: media.clone(),
            video: media.clone(),
            storage: storage.clone(),
            publisher: publisher.clone(),
        };
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), services, config));

        Self {
            store,
            scraper,
            paraphraser,
            media,
            storage,
            publisher,
            orchestrator,
        }
    }

    pub async fn item(&self, id: Uuid) -> Item {
        self.store
            .get(id)
            .await
            .expect("store available")
            .expect("item exists")
    }
}
