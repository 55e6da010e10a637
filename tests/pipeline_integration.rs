//! End-to-end tests of the pipeline against in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use newsreel::error::{ServiceError, StageError};
use newsreel::item::{Stage, StagePayload, StagePredicate};
use newsreel::pipeline::{PublishResolution, Scheduler, StageRunner};
use newsreel::services::PLACEHOLDER_PROMPT;
use newsreel::store::{ItemStore, MemoryItemStore};

use common::*;

#[tokio::test(start_paused = true)]
async fn test_full_cycle_publishes_and_cleans_up() {
    let h = Harness::new();
    h.scraper.set_articles(vec![article(1)]);

    let report = h.orchestrator.run_cycle().await.expect("cycle runs");

    let scraped = report.scraped.as_ref().unwrap();
    assert_eq!(scraped.created, 1);
    for stage in Stage::PROCESSING {
        assert_eq!(report.stage(stage).unwrap().succeeded(), 1, "stage {}", stage);
    }

    let items = h.store.list().await.unwrap();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.stage(), Stage::Published);
    assert_eq!(item.media_refs.len(), 5);
    assert_eq!(
        item.media_refs[0],
        format!("/generated_images/{}/image_1.png", item.id)
    );
    assert_eq!(
        item.audio_ref.as_deref(),
        Some(format!("/generated_audio/{}/audio.wav", item.id).as_str())
    );
    assert!(item
        .video_ref
        .as_deref()
        .unwrap()
        .starts_with(&format!("/generated_video/{}/", item.id)));

    let request = h.publisher.requests.lock().unwrap()[0].clone();
    assert_eq!(request.caption, item.derived_text.clone().unwrap());
    assert_eq!(request.hashtags, vec!["#story"]);

    assert_eq!(h.storage.file_count(), 0);
    assert_eq!(h.storage.deleted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_idempotent_resume_makes_no_calls() {
    let h = Harness::new();
    h.scraper.set_articles(vec![article(1)]);
    h.orchestrator
        .run_stages(&[Stage::Scraped, Stage::PromptsReady])
        .await
        .unwrap();
    assert_eq!(h.paraphraser.calls(), 1);
    let before = h.store.list().await.unwrap();

    let report = h
        .orchestrator
        .run_stages(&[Stage::PromptsReady])
        .await
        .unwrap();

    assert!(report.stage(Stage::PromptsReady).unwrap().outcomes.is_empty());
    assert_eq!(h.paraphraser.calls(), 1);
    assert_eq!(h.store.list().await.unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_scrape_dedups_normalized_links() {
    let h = Harness::new();
    let mut tracked = article(1);
    tracked.link = "https://news.example/story/1/?utm_source=facebook#comments".to_string();
    h.scraper.set_articles(vec![article(1), tracked]);

    let first = h.orchestrator.scrape().await;
    assert_eq!(first.fetched, 2);
    assert_eq!(first.created, 1);
    assert_eq!(first.duplicates, 1);

    let second = h.orchestrator.scrape().await;
    assert_eq!(second.created, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scrape_respects_limit_and_rejects_incomplete() {
    let h = Harness::with_config(test_config().with_scrape_limit(3));
    let mut articles: Vec<_> = (1..=6).map(article).collect();
    articles[0].content = "   ".to_string();
    articles[1].link = "/relative/link".to_string();
    h.scraper.set_articles(articles);

    let summary = h.orchestrator.scrape().await;

    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.created, 3);
    assert_eq!(h.store.len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_paraphrase_exhaustion_falls_back_to_original() {
    let h = Harness::new();
    *h.paraphraser.failing.lock().unwrap() = true;
    h.scraper.set_articles(vec![article(7)]);

    let start = tokio::time::Instant::now();
    let report = h
        .orchestrator
        .run_stages(&[Stage::Scraped, Stage::PromptsReady])
        .await
        .unwrap();

    assert_eq!(h.paraphraser.calls(), 3);
    // 10ms after the first failure, 20ms after the second
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(report.stage(Stage::PromptsReady).unwrap().succeeded(), 1);

    let item = &h.store.list().await.unwrap()[0];
    assert!(item.flags.prompts_ready.done);
    assert_eq!(item.derived_title.as_deref(), Some("Headline 7"));
    assert_eq!(item.image_prompts, vec![PLACEHOLDER_PROMPT; 5]);
    assert_eq!(item.hashtags, vec!["#nepal", "#news", "#nepalinews"]);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_paraphrase_is_retried() {
    let h = Harness::with_config(test_config().with_expected_prompts(6));
    h.scraper.set_articles(vec![article(1)]);

    h.orchestrator
        .run_stages(&[Stage::Scraped, Stage::PromptsReady])
        .await
        .unwrap();

    // the stub always returns 5 prompts, so every attempt is malformed
    assert_eq!(h.paraphraser.calls(), 3);
    let item = &h.store.list().await.unwrap()[0];
    assert_eq!(item.image_prompts, vec![PLACEHOLDER_PROMPT; 6]);
}

#[tokio::test(start_paused = true)]
async fn test_identical_articles_hit_the_cache() {
    let h = Harness::new();
    let a = article(1);
    let mut b = article(1);
    b.link = "https://mirror.example/story/1".to_string();
    h.scraper.set_articles(vec![a, b]);

    h.orchestrator
        .run_stages(&[Stage::Scraped, Stage::PromptsReady, Stage::ImagesReady])
        .await
        .unwrap();

    assert_eq!(h.store.len().await, 2);
    assert_eq!(h.paraphraser.calls(), 1);
    // five distinct prompts, generated once and reused for the second item
    assert_eq!(h.media.image_calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    let stats = h.orchestrator.context().media_cache.stats();
    assert_eq!(stats.hits, 5);
}

#[tokio::test(start_paused = true)]
async fn test_batch_isolation() {
    let store = Arc::new(MemoryItemStore::new());
    let mut ids = Vec::new();
    for n in 1..=3 {
        let outcome = store
            .create_if_absent(new_item(&format!("https://x/{}", n)))
            .await
            .unwrap();
        ids.push(outcome.id);
    }
    let failing = ids[1];
    let runner = StageRunner::new(store.clone(), Duration::from_secs(1));

    let outcomes = runner
        .run_with(StagePredicate::NeedsPrompts, 5, move |item| async move {
            if item.id == failing {
                return Err(StageError::from(ServiceError::Status {
                    code: 500,
                    message: "always fails".to_string(),
                }));
            }
            Ok(StagePayload::Prompts {
                derived_title: item.title.clone(),
                derived_text: item.body.clone(),
                hashtags: vec![],
                image_prompts: vec!["scene".to_string()],
            })
        })
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].success);
    assert!(!outcomes[1].success);
    assert!(outcomes[2].success);

    let first = store.get(ids[0]).await.unwrap().unwrap();
    let second = store.get(ids[1]).await.unwrap().unwrap();
    let third = store.get(ids[2]).await.unwrap().unwrap();
    assert!(first.flags.prompts_ready.done);
    assert!(third.flags.prompts_ready.done);
    assert!(!second.flags.prompts_ready.done);
    assert!(second
        .flags
        .prompts_ready
        .last_error
        .as_deref()
        .unwrap()
        .contains("always fails"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_rows_never_reach_the_renderer() {
    let inner = MemoryItemStore::new();
    let mut item = item_with_prompts("https://x/1", &["scene"]);
    item.flags.image_done.done = true;
    item.flags.audio_done.done = true;
    item.audio_ref = Some("/generated_audio/x/audio.wav".to_string());
    let id = item.id;
    inner.insert(item).await.unwrap();
    let h = Harness::with_store(StaleStore { inner }, test_config());

    let report = h
        .orchestrator
        .run_stages(&[Stage::VideoReady])
        .await
        .unwrap();

    let outcomes = &report.stage(Stage::VideoReady).unwrap().outcomes;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].skipped);
    assert_eq!(h.media.video_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    let item = h.item(id).await;
    assert!(!item.flags.video_done.done);
    assert!(item.video_ref.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_images_stage_end_to_end() {
    let h = Harness::new();
    let item = item_with_prompts("https://x/1", &["a river at dawn"]);
    let id = item.id;
    h.store.insert(item).await.unwrap();
    *h.storage.fixed_ref.lock().unwrap() = Some("/img/a.png".to_string());

    h.orchestrator
        .run_stages(&[Stage::ImagesReady])
        .await
        .unwrap();

    let item = h.item(id).await;
    assert!(item.flags.image_done.done);
    assert_eq!(item.media_refs, vec!["/img/a.png"]);
    let remaining = h
        .store
        .find_by_stage_predicate(StagePredicate::NeedsImages)
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_images_stage_skips_failed_prompts() {
    let h = Harness::new();
    let partial = item_with_prompts("https://x/1", &["calm lake", "BROKEN bridge", "busy market"]);
    let hopeless = item_with_prompts("https://x/2", &["BROKEN one", "BROKEN two"]);
    let (partial_id, hopeless_id) = (partial.id, hopeless.id);
    h.store.insert(partial).await.unwrap();
    h.store.insert(hopeless).await.unwrap();
    h.media.fail_on("BROKEN");

    let report = h
        .orchestrator
        .run_stages(&[Stage::ImagesReady])
        .await
        .unwrap();
    let stage = report.stage(Stage::ImagesReady).unwrap();
    assert_eq!(stage.succeeded(), 1);
    assert_eq!(stage.failed(), 1);

    let partial = h.item(partial_id).await;
    assert!(partial.flags.image_done.done);
    assert_eq!(
        partial.media_refs,
        vec![
            format!("/generated_images/{}/image_1.png", partial_id),
            format!("/generated_images/{}/image_3.png", partial_id),
        ]
    );

    let hopeless = h.item(hopeless_id).await;
    assert!(!hopeless.flags.image_done.done);
    assert!(hopeless.flags.image_done.last_error.is_some());
    assert!(StagePredicate::NeedsImages.matches(&hopeless));
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_publish_is_held_until_resolved() {
    let h = Harness::new();
    h.scraper.set_articles(vec![article(1)]);
    h.publisher.set_mode(PublishMode::Unconfirmed);

    h.orchestrator.run_cycle().await.unwrap();
    let id = h.store.list().await.unwrap()[0].id;
    let item = h.item(id).await;
    assert!(!item.flags.published.done);
    assert!(item.flags.published.held);
    assert!(item.flags.published.last_error.is_some());
    assert_eq!(h.publisher.calls(), 1);
    assert!(h.storage.deleted().is_empty());

    // held items are not published again
    h.publisher.set_mode(PublishMode::Succeed);
    h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(h.publisher.calls(), 1);

    h.orchestrator
        .resolve_publish(id, PublishResolution::Retry)
        .await
        .unwrap();
    h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(h.publisher.calls(), 2);
    assert!(h.item(id).await.flags.published.done);
    assert_eq!(h.storage.deleted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_posted_marks_published_and_cleans_up() {
    let h = Harness::new();
    h.scraper.set_articles(vec![article(1)]);
    h.publisher.set_mode(PublishMode::Unconfirmed);
    h.orchestrator.run_cycle().await.unwrap();
    let id = h.store.list().await.unwrap()[0].id;
    assert!(h.storage.file_count() > 0);

    h.orchestrator
        .resolve_publish(id, PublishResolution::Posted)
        .await
        .unwrap();

    let item = h.item(id).await;
    assert!(item.flags.published.done);
    assert!(!item.flags.published.held);
    assert_eq!(h.storage.file_count(), 0);
    assert_eq!(h.publisher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_publish_retries_next_cycle_without_cleanup() {
    let h = Harness::new();
    h.scraper.set_articles(vec![article(1)]);
    h.publisher.set_mode(PublishMode::Reject);

    h.orchestrator.run_cycle().await.unwrap();
    let id = h.store.list().await.unwrap()[0].id;
    let item = h.item(id).await;
    assert!(!item.flags.published.held);
    assert!(item
        .flags
        .published
        .last_error
        .as_deref()
        .unwrap()
        .contains("platform unavailable"));
    // a single attempt per cycle, even for a transient status
    assert_eq!(h.publisher.calls(), 1);
    assert!(h.storage.deleted().is_empty());
    assert!(h.storage.file_count() > 0);

    h.publisher.set_mode(PublishMode::Succeed);
    h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(h.publisher.calls(), 2);
    let item = h.item(id).await;
    assert!(item.flags.published.done);
    assert!(item.flags.published.last_error.is_none());
    assert_eq!(h.storage.file_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_unknown_item() {
    let h = Harness::new();
    let err = h
        .orchestrator
        .resolve_publish(uuid::Uuid::new_v4(), PublishResolution::Posted)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("item not found"));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_cycle_is_skipped() {
    let h = Harness::new();
    *h.scraper.delay.lock().unwrap() = Some(Duration::from_secs(60));

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_cycle().await });
    while !h.orchestrator.is_running() {
        tokio::task::yield_now().await;
    }

    assert!(h.orchestrator.run_cycle().await.is_none());
    assert!(first.await.unwrap().is_some());
    assert_eq!(h.scraper.calls(), 1);
    assert!(!h.orchestrator.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_is_reported_not_raised() {
    let h = Harness::with_store(UnreachableStore, test_config());
    h.scraper.set_articles(vec![article(1)]);

    let report = h.orchestrator.run_cycle().await.expect("cycle runs");

    assert!(report.scraped.as_ref().unwrap().error.is_some());
    assert_eq!(report.stages.len(), 5);
    for stage in &report.stages {
        assert!(stage.fatal_error.is_some());
        assert!(stage.outcomes.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_at_start_and_on_interval() {
    let h = Harness::with_config(test_config().with_cycle_interval(Duration::from_secs(3600)));

    let triggered = Scheduler::new(h.orchestrator.clone())
        .run_until(tokio::time::sleep(Duration::from_secs(2 * 3600 + 60)))
        .await;

    assert_eq!(triggered, 3);
    assert_eq!(h.scraper.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_without_initial_run() {
    let h = Harness::with_config(test_config().with_cycle_interval(Duration::from_secs(3600)));

    let triggered = Scheduler::new(h.orchestrator.clone())
        .with_run_on_start(false)
        .run_until(tokio::time::sleep(Duration::from_secs(3600 + 60)))
        .await;

    assert_eq!(triggered, 1);
    assert_eq!(h.scraper.calls(), 1);
}
