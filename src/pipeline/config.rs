//! Pipeline configuration.
//!
//! Defaults carry the production policy (batch sizes, pacing, retry budget,
//! cache TTL, rate limits, cycle period). Every value can be overridden from
//! `NEWSREEL_*` environment variables via [`PipelineConfig::from_env`] or
//! programmatically with the `with_*` builders.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::item::Stage;
use crate::resilience::{CacheConfig, RateLimiter, RateLimiters, RetryPolicy};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Batch, pacing and rate settings for one processing stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    /// Maximum items processed per run.
    pub batch_size: usize,
    /// Pause between consecutive items.
    pub item_delay: Duration,
    /// Outbound calls per second allowed to this stage's service.
    pub rate_per_sec: u32,
}

impl StageSettings {
    pub const fn new(batch_size: usize, item_delay: Duration, rate_per_sec: u32) -> Self {
        Self {
            batch_size,
            item_delay,
            rate_per_sec,
        }
    }
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Scrape settings
    /// New articles ingested per cycle at most.
    pub scrape_limit: usize,
    /// Scraper calls per second.
    pub scrape_rate: u32,
    /// Timeout for scraper fetches.
    pub fetch_timeout: Duration,

    // Stage settings
    pub prompts: StageSettings,
    pub images: StageSettings,
    pub audio: StageSettings,
    pub video: StageSettings,
    pub publish: StageSettings,
    /// Pause between images of the same item.
    pub image_delay: Duration,
    /// Number of image prompts a paraphrase must produce.
    pub expected_prompts: usize,
    /// Hashtags used when the paraphrase produced none.
    pub default_hashtags: Vec<String>,

    // Resilience settings
    /// Attempts per external call (publish always gets one).
    pub max_attempts: u32,
    /// Base retry delay; attempt `n` waits `n * base`.
    pub retry_base_delay: Duration,
    /// Lifetime of cached generation results.
    pub cache_ttl: Duration,
    /// Period of the expired-entry sweep.
    pub cache_sweep_interval: Duration,
    /// Entries kept per cache.
    pub cache_max_entries: usize,
    /// Timeout for generation and rendering calls.
    pub generation_timeout: Duration,

    // Scheduling
    /// Period between cycles.
    pub cycle_interval: Duration,
    /// Run a cycle immediately at startup.
    pub run_on_start: bool,

    // Storage
    /// Directory holding generated media.
    pub media_root: PathBuf,
    /// SQLite database path or URL.
    pub database_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scrape_limit: 5,
            scrape_rate: 5,
            fetch_timeout: Duration::from_secs(10),

            prompts: StageSettings::new(5, Duration::from_secs(2), 5),
            images: StageSettings::new(5, Duration::from_secs(1), 2),
            audio: StageSettings::new(5, Duration::from_secs(1), 2),
            video: StageSettings::new(3, Duration::from_secs(5), 1),
            publish: StageSettings::new(5, Duration::from_secs(5), 1),
            image_delay: Duration::from_millis(1500),
            expected_prompts: 5,
            default_hashtags: vec![
                "#nepal".to_string(),
                "#news".to_string(),
                "#nepalinews".to_string(),
            ],

            max_attempts: 3,
            retry_base_delay: Duration::from_millis(2000),
            cache_ttl: Duration::from_secs(3600),
            cache_sweep_interval: Duration::from_secs(600),
            cache_max_entries: 500,
            generation_timeout: Duration::from_secs(300),

            cycle_interval: Duration::from_secs(2 * 60 * 60),
            run_on_start: true,

            media_root: PathBuf::from("./public"),
            database_url: "newsreel.db".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings of a processing stage; `None` for the scrape step.
    pub fn stage(&self, stage: Stage) -> Option<&StageSettings> {
        match stage {
            Stage::Scraped => None,
            Stage::PromptsReady => Some(&self.prompts),
            Stage::ImagesReady => Some(&self.images),
            Stage::AudioReady => Some(&self.audio),
            Stage::VideoReady => Some(&self.video),
            Stage::Published => Some(&self.publish),
        }
    }

    fn stage_mut(&mut self, stage: Stage) -> Option<&mut StageSettings> {
        match stage {
            Stage::Scraped => None,
            Stage::PromptsReady => Some(&mut self.prompts),
            Stage::ImagesReady => Some(&mut self.images),
            Stage::AudioReady => Some(&mut self.audio),
            Stage::VideoReady => Some(&mut self.video),
            Stage::Published => Some(&mut self.publish),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables (all optional):
    /// - `NEWSREEL_SCRAPE_LIMIT`, `NEWSREEL_SCRAPE_RATE`, `NEWSREEL_FETCH_TIMEOUT_SECS`
    /// - `NEWSREEL_<STAGE>_BATCH_SIZE`, `NEWSREEL_<STAGE>_DELAY_MS`, `NEWSREEL_<STAGE>_RATE`
    ///   for `<STAGE>` in `PROMPTS`, `IMAGES`, `AUDIO`, `VIDEO`, `PUBLISH`
    /// - `NEWSREEL_IMAGE_DELAY_MS`, `NEWSREEL_EXPECTED_PROMPTS`, `NEWSREEL_DEFAULT_HASHTAGS`
    /// - `NEWSREEL_MAX_ATTEMPTS`, `NEWSREEL_RETRY_BASE_DELAY_MS`
    /// - `NEWSREEL_CACHE_TTL_SECS`, `NEWSREEL_CACHE_SWEEP_SECS`, `NEWSREEL_CACHE_MAX_ENTRIES`
    /// - `NEWSREEL_GENERATION_TIMEOUT_SECS`
    /// - `NEWSREEL_CYCLE_INTERVAL_SECS`, `NEWSREEL_RUN_ON_START`
    /// - `NEWSREEL_MEDIA_ROOT`, `NEWSREEL_DATABASE_URL`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed, or
    /// `ConfigError::ValidationFailed` if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Scrape settings
        if let Some(val) = lookup("NEWSREEL_SCRAPE_LIMIT") {
            config.scrape_limit = parse_env_value(&val, "NEWSREEL_SCRAPE_LIMIT")?;
        }
        if let Some(val) = lookup("NEWSREEL_SCRAPE_RATE") {
            config.scrape_rate = parse_env_value(&val, "NEWSREEL_SCRAPE_RATE")?;
        }
        if let Some(val) = lookup("NEWSREEL_FETCH_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWSREEL_FETCH_TIMEOUT_SECS")?;
            config.fetch_timeout = Duration::from_secs(secs);
        }

        // Stage settings
        for stage in Stage::PROCESSING {
            let name = stage.as_str().to_uppercase();
            let batch_key = format!("NEWSREEL_{}_BATCH_SIZE", name);
            let delay_key = format!("NEWSREEL_{}_DELAY_MS", name);
            let rate_key = format!("NEWSREEL_{}_RATE", name);

            let batch = lookup(&batch_key)
                .map(|val| parse_env_value::<usize>(&val, &batch_key))
                .transpose()?;
            let delay = lookup(&delay_key)
                .map(|val| parse_env_value::<u64>(&val, &delay_key))
                .transpose()?;
            let rate = lookup(&rate_key)
                .map(|val| parse_env_value::<u32>(&val, &rate_key))
                .transpose()?;

            if let Some(settings) = config.stage_mut(stage) {
                if let Some(batch) = batch {
                    settings.batch_size = batch;
                }
                if let Some(ms) = delay {
                    settings.item_delay = Duration::from_millis(ms);
                }
                if let Some(rate) = rate {
                    settings.rate_per_sec = rate;
                }
            }
        }

        if let Some(val) = lookup("NEWSREEL_IMAGE_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "NEWSREEL_IMAGE_DELAY_MS")?;
            config.image_delay = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("NEWSREEL_EXPECTED_PROMPTS") {
            config.expected_prompts = parse_env_value(&val, "NEWSREEL_EXPECTED_PROMPTS")?;
        }
        if let Some(val) = lookup("NEWSREEL_DEFAULT_HASHTAGS") {
            config.default_hashtags = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Resilience settings
        if let Some(val) = lookup("NEWSREEL_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "NEWSREEL_MAX_ATTEMPTS")?;
        }
        if let Some(val) = lookup("NEWSREEL_RETRY_BASE_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "NEWSREEL_RETRY_BASE_DELAY_MS")?;
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("NEWSREEL_CACHE_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWSREEL_CACHE_TTL_SECS")?;
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("NEWSREEL_CACHE_SWEEP_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWSREEL_CACHE_SWEEP_SECS")?;
            config.cache_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("NEWSREEL_CACHE_MAX_ENTRIES") {
            config.cache_max_entries = parse_env_value(&val, "NEWSREEL_CACHE_MAX_ENTRIES")?;
        }
        if let Some(val) = lookup("NEWSREEL_GENERATION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWSREEL_GENERATION_TIMEOUT_SECS")?;
            config.generation_timeout = Duration::from_secs(secs);
        }

        // Scheduling
        if let Some(val) = lookup("NEWSREEL_CYCLE_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWSREEL_CYCLE_INTERVAL_SECS")?;
            config.cycle_interval = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("NEWSREEL_RUN_ON_START") {
            config.run_on_start = parse_env_bool(&val, "NEWSREEL_RUN_ON_START")?;
        }

        // Storage
        if let Some(val) = lookup("NEWSREEL_MEDIA_ROOT") {
            config.media_root = PathBuf::from(val);
        }
        if let Some(val) = lookup("NEWSREEL_DATABASE_URL") {
            config.database_url = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` describing the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scrape_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "scrape_limit must be greater than 0".to_string(),
            ));
        }
        if self.scrape_rate == 0 {
            return Err(ConfigError::ValidationFailed(
                "scrape_rate must be greater than 0".to_string(),
            ));
        }

        for stage in Stage::PROCESSING {
            if let Some(settings) = self.stage(stage) {
                if settings.batch_size == 0 {
                    return Err(ConfigError::ValidationFailed(format!(
                        "{} batch_size must be greater than 0",
                        stage
                    )));
                }
                if settings.rate_per_sec == 0 {
                    return Err(ConfigError::ValidationFailed(format!(
                        "{} rate_per_sec must be greater than 0",
                        stage
                    )));
                }
            }
        }

        if self.expected_prompts == 0 {
            return Err(ConfigError::ValidationFailed(
                "expected_prompts must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cache_ttl must be greater than 0".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::ValidationFailed(
                "cache_max_entries must be greater than 0".to_string(),
            ));
        }
        if self.cycle_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cycle_interval must be greater than 0".to_string(),
            ));
        }
        if self.cache_sweep_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cache_sweep_interval must be greater than 0".to_string(),
            ));
        }
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// One limiter per dependency, sized from the configured rates.
    pub fn rate_limiters(&self) -> RateLimiters {
        RateLimiters {
            scraper: RateLimiter::per_second("scraper", self.scrape_rate),
            paraphrase: RateLimiter::per_second("paraphrase", self.prompts.rate_per_sec),
            image: RateLimiter::per_second("image", self.images.rate_per_sec),
            audio: RateLimiter::per_second("audio", self.audio.rate_per_sec),
            video: RateLimiter::per_second("video", self.video.rate_per_sec),
            publish: RateLimiter::per_second("publish", self.publish.rate_per_sec),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_base_delay)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.cache_max_entries).with_ttl(self.cache_ttl)
    }

    // Builder methods

    pub fn with_scrape_limit(mut self, limit: usize) -> Self {
        self.scrape_limit = limit;
        self
    }

    /// Replace the settings of a processing stage; ignored for the scrape step.
    pub fn with_stage(mut self, stage: Stage, settings: StageSettings) -> Self {
        if let Some(slot) = self.stage_mut(stage) {
            *slot = settings;
        }
        self
    }

    /// Remove every pacing delay (items and images).
    pub fn without_delays(mut self) -> Self {
        for stage in Stage::PROCESSING {
            if let Some(settings) = self.stage_mut(stage) {
                settings.item_delay = Duration::ZERO;
            }
        }
        self.image_delay = Duration::ZERO;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_expected_prompts(mut self, count: usize) -> Self {
        self.expected_prompts = count;
        self
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = root.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
