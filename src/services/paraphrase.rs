//! LLM-backed paraphrase service.
//!
//! Talks to any OpenAI-compatible chat completions endpoint (LiteLLM,
//! OpenRouter, ...) and asks for a rewritten title and summary, hashtags
//! and a fixed number of English image prompts, returned as JSON.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ParaphraseResult, Paraphraser};
use crate::error::ServiceError;
use crate::utils::fingerprint::prefix;
use crate::utils::json_extraction::extract_json_object;

const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
const DEFAULT_LANGUAGE: &str = "Nepali";

/// Article content sent to the model is capped at this many characters.
const MAX_CONTENT_CHARS: usize = 4000;

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Image prompts come back either as plain strings or as `{prompt, aspect}` objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PromptEntry {
    Text(String),
    Detailed { prompt: String },
}

impl PromptEntry {
    fn into_prompt(self) -> String {
        match self {
            PromptEntry::Text(prompt) | PromptEntry::Detailed { prompt } => prompt,
        }
    }
}

/// JSON document the model is asked to produce.
#[derive(Debug, Deserialize)]
struct ModelOutput {
    #[serde(alias = "paraphrased_title")]
    title: String,
    #[serde(alias = "paraphrased_content")]
    content: String,
    #[serde(default, alias = "captions")]
    hashtags: Vec<String>,
    #[serde(default)]
    image_prompts: Vec<PromptEntry>,
}

/// Parse the model's reply into a [`ParaphraseResult`].
///
/// # Errors
///
/// Returns [`ServiceError::InvalidResponse`] when no JSON object is present
/// or it lacks the required fields.
pub fn parse_model_output(reply: &str) -> Result<ParaphraseResult, ServiceError> {
    let json = extract_json_object(reply).ok_or_else(|| {
        ServiceError::InvalidResponse(format!(
            "no JSON object in model reply starting with '{}'",
            prefix(reply, 80)
        ))
    })?;
    let output: ModelOutput = serde_json::from_str(&json)
        .map_err(|e| ServiceError::InvalidResponse(format!("unexpected JSON shape: {}", e)))?;

    Ok(ParaphraseResult {
        title: output.title.trim().to_string(),
        content: output.content.trim().to_string(),
        hashtags: output
            .hashtags
            .into_iter()
            .map(|tag| normalize_hashtag(&tag))
            .filter(|tag| tag.len() > 1)
            .collect(),
        image_prompts: output
            .image_prompts
            .into_iter()
            .map(PromptEntry::into_prompt)
            .collect(),
    })
}

fn normalize_hashtag(tag: &str) -> String {
    let body: String = tag
        .trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    format!("#{}", body)
}

/// Paraphrase service on top of a chat completions API.
pub struct LlmParaphraser {
    api_base: String,
    api_key: Option<String>,
    model: String,
    language: String,
    prompt_count: usize,
    http_client: Client,
}

impl LlmParaphraser {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            prompt_count: 5,
            http_client,
        })
    }

    /// Create a client from environment variables.
    ///
    /// Reads:
    /// - `LITELLM_API_BASE`: base URL of the API (required)
    /// - `LITELLM_API_KEY`: bearer token (optional)
    /// - `LITELLM_DEFAULT_MODEL`: model id
    /// - `NEWSREEL_LANGUAGE`: target language of the rewrite
    pub fn from_env(timeout: Duration) -> Result<Self, ServiceError> {
        let api_base = env::var("LITELLM_API_BASE")
            .map_err(|_| ServiceError::NotConfigured("LITELLM_API_BASE not set".to_string()))?;
        let api_key = env::var("LITELLM_API_KEY").ok();
        let model = env::var("LITELLM_DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let mut client = Self::new(api_base, api_key, model, timeout)?;
        if let Ok(language) = env::var("NEWSREEL_LANGUAGE") {
            client.language = language;
        }
        Ok(client)
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_prompt_count(mut self, count: usize) -> Self {
        self.prompt_count = count;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(&self, title: &str, content: &str) -> Vec<Message> {
        let system = "You rewrite news articles for short vertical videos. Reply with a single JSON object \
             and nothing else, using the keys \"title\", \"content\", \"hashtags\" and \"image_prompts\".";
        let user = format!(
            "Rewrite this article.\n\n\
             1. Paraphrase the title and content into natural, fluent {language}; keep the content under 60 words.\n\
             2. Give at least 7 lowercase English hashtags based on the content.\n\
             3. Write exactly {count} detailed English image prompts (50-100 words each), each showing a different \
             aspect of the story: photorealistic, 9:16 portrait, culturally appropriate, no weapons or violence.\n\
             Preserve all names, dates and numbers exactly.\n\n\
             Title: {title}\n\
             Content: {content}",
            language = self.language,
            count = self.prompt_count,
            title = title,
            content = prefix(content, MAX_CONTENT_CHARS),
        );
        vec![Message::system(system), Message::user(user)]
    }
}

#[async_trait]
impl Paraphraser for LlmParaphraser {
    async fn generate(&self, title: &str, content: &str) -> Result<ParaphraseResult, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: self.build_messages(title, content),
            temperature: 0.7,
        };
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(&request)
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(ServiceError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let response: ChatResponse = http_response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(format!("chat completion response: {}", e)))?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse("no choices in response".to_string()))?;

        tracing::debug!(model = %self.model, reply_len = reply.len(), "Paraphrase reply received");
        parse_model_output(&reply)
    }
}
