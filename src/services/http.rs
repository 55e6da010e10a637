//! HTTP clients for the scraper, media and publishing services.
//!
//! Each service is a small sidecar reached over JSON/HTTP:
//!
//! | Service   | Request                          | Response             |
//! |-----------|----------------------------------|----------------------|
//! | scraper   | `GET {base}`                     | JSON `[RawArticle]`  |
//! | image     | `POST {base}` `{"prompt": ...}`  | image bytes          |
//! | audio     | `POST {base}` `{"text": ...}`    | WAV bytes            |
//! | video     | `POST {base}` `RenderRequest`    | MP4 bytes            |
//! | publisher | `POST {base}` `PublishRequest`   | any 2xx              |

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;

use super::{
    AudioGenerator, ImageGenerator, PublishRequest, Publisher, RawArticle, RenderRequest,
    Scraper, VideoRenderer,
};
use crate::error::ServiceError;

/// Default timeout for scraper fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for generation and rendering calls.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

fn build_client(timeout: Duration) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::NotConfigured(format!("HTTP client: {}", e)))
}

fn endpoint_from_env(key: &str) -> Result<String, ServiceError> {
    env::var(key).map_err(|_| ServiceError::NotConfigured(format!("{} not set", key)))
}

/// Turn a non-success response into [`ServiceError::Status`].
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error response".to_string());
    Err(ServiceError::Status {
        code: status.as_u16(),
        message,
    })
}

/// Scraper sidecar returning already-extracted articles.
pub struct HttpScraper {
    endpoint: String,
    client: Client,
}

impl HttpScraper {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: build_client(timeout)?,
        })
    }

    /// Reads `NEWSREEL_SCRAPER_URL`.
    pub fn from_env(timeout: Duration) -> Result<Self, ServiceError> {
        Self::new(endpoint_from_env("NEWSREEL_SCRAPER_URL")?, timeout)
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape_news(&self) -> Result<Vec<RawArticle>, ServiceError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept-Language", "en-US,en;q=0.9,ne;q=0.8")
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        let response = check_status(response).await?;
        response
            .json::<Vec<RawArticle>>()
            .await
            .map_err(|e| ServiceError::Parse(format!("scraper response: {}", e)))
    }
}

/// Generation sidecar answering a JSON request with raw media bytes.
///
/// One instance per endpoint; the same type serves images, audio and video.
pub struct HttpMediaService {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct PromptBody<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
struct TextBody<'a> {
    text: &'a str,
}

impl HttpMediaService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: build_client(timeout)?,
        })
    }

    /// Build from the endpoint in environment variable `key`.
    pub fn from_env(key: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Self::new(endpoint_from_env(key)?, timeout)
    }

    async fn post_for_bytes<B: Serialize + ?Sized>(&self, body: &B) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(ServiceError::from_reqwest)?;
        if bytes.is_empty() {
            return Err(ServiceError::InvalidResponse(format!(
                "{} returned an empty body",
                self.endpoint
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for HttpMediaService {
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ServiceError> {
        self.post_for_bytes(&PromptBody { prompt }).await
    }
}

#[async_trait]
impl AudioGenerator for HttpMediaService {
    async fn generate_audio(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        self.post_for_bytes(&TextBody { text }).await
    }
}

#[async_trait]
impl VideoRenderer for HttpMediaService {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ServiceError> {
        self.post_for_bytes(request).await
    }
}

/// Publishing sidecar.
///
/// Errors are split by whether the post may have gone through: a timeout
/// after sending, or a gateway error, is [`ServiceError::Unconfirmed`];
/// connection failures and explicit rejections are definite failures.
pub struct HttpPublisher {
    endpoint: String,
    client: Client,
}

impl HttpPublisher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: build_client(timeout)?,
        })
    }

    /// Reads `NEWSREEL_PUBLISH_URL`.
    pub fn from_env(timeout: Duration) -> Result<Self, ServiceError> {
        Self::new(endpoint_from_env("NEWSREEL_PUBLISH_URL")?, timeout)
    }
}

/// Classify a publish failure by whether the post may exist.
pub fn classify_publish_error(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::Timeout(msg) => ServiceError::Unconfirmed(format!("timed out: {}", msg)),
        ServiceError::Status { code, message } if code == 502 || code == 504 => {
            ServiceError::Unconfirmed(format!("gateway status {}: {}", code, message))
        }
        other => other,
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_publish_error(ServiceError::from_reqwest(e)))?;
        check_status(response)
            .await
            .map(|_| ())
            .map_err(classify_publish_error)
    }
}
