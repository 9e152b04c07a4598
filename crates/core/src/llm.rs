//! Text generation through the Gemini `generateContent` REST API.
//!
//! Pipeline stages only see the [`TextGenerator`] trait; [`GeminiClient`] is
//! the production implementation. All four harm categories are sent with
//! `BLOCK_NONE` since lesson texts regularly trip the default filters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{Result, StudyDeckError};

/// Default REST endpoint, `{model}` is substituted per request.
pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Model name and sampling parameters for one pipeline step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub name: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            name: "gemini-2.5-flash".to_string(),
            temperature: None,
            top_p: None,
            top_k: None,
            max_output_tokens: None,
            timeout: 120,
        }
    }
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }
}

/// Shape the response text is asked to take.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// JSON constrained by an OpenAPI-style schema.
    Json { schema: Value },
}

/// One prompt for one model.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub model: &'a ModelSpec,
    pub prompt: String,
    pub format: ResponseFormat,
}

impl<'a> GenerationRequest<'a> {
    pub fn text(model: &'a ModelSpec, prompt: impl Into<String>) -> Self {
        Self { model, prompt: prompt.into(), format: ResponseFormat::Text }
    }

    pub fn json(model: &'a ModelSpec, prompt: impl Into<String>, schema: Value) -> Self {
        Self { model, prompt: prompt.into(), format: ResponseFormat::Json { schema } }
    }
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the non-empty response text.
    ///
    /// # Errors
    ///
    /// [`StudyDeckError::EmptyResponse`] when the model produced no text,
    /// [`StudyDeckError::Api`] or [`StudyDeckError::HttpError`] when the call
    /// itself failed.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

/// Gemini REST client authenticated with an API key.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build().map_err(StudyDeckError::HttpError)?;
        Ok(Self { client, endpoint: GEMINI_ENDPOINT.to_string(), api_key: api_key.into() })
    }

    /// Points the client at another endpoint template (must contain `{model}`).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let model = request.model;
        let url = self.endpoint.replace("{model}", &model.name);
        tracing::debug!(model = %model.name, prompt_chars = request.prompt.chars().count(), "Calling Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(model.timeout))
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| timeout_or_http(e, model.timeout))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| timeout_or_http(e, model.timeout))?;

        if !status.is_success() {
            return Err(StudyDeckError::Api {
                service: "Gemini".to_string(),
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        parsed.into_text()
    }
}

fn timeout_or_http(err: reqwest::Error, timeout: u64) -> StudyDeckError {
    if err.is_timeout() { StudyDeckError::Timeout { timeout } } else { StudyDeckError::HttpError(err) }
}

/// Pulls `error.message` out of a Google API error body, falling back to
/// the raw body.
pub(crate) fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn request_body(request: &GenerationRequest<'_>) -> Value {
    let model = request.model;
    let mut config = serde_json::Map::new();
    if let Some(t) = model.temperature {
        config.insert("temperature".into(), json!(t));
    }
    if let Some(p) = model.top_p {
        config.insert("topP".into(), json!(p));
    }
    if let Some(k) = model.top_k {
        config.insert("topK".into(), json!(k));
    }
    if let Some(n) = model.max_output_tokens {
        config.insert("maxOutputTokens".into(), json!(n));
    }
    if let ResponseFormat::Json { schema } = &request.format {
        config.insert("responseMimeType".into(), json!("application/json"));
        config.insert("responseSchema".into(), schema.clone());
    }

    let safety: Vec<Value> = HARM_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect();

    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": config,
        "safetySettings": safety,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);

        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = block_reason.map_or_else(|| "no candidates".to_string(), |r| format!("blocked: {}", r));
            return Err(StudyDeckError::EmptyResponse { reason });
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate.finish_reason.or(block_reason).unwrap_or_else(|| "no text".to_string());
            return Err(StudyDeckError::EmptyResponse { reason });
        }

        Ok(text)
    }
}
