//! AnkiConnect (API version 6) client.
//!
//! The importer works against the [`FlashcardStore`] trait; [`AnkiConnect`]
//! speaks the JSON protocol of the AnkiConnect add-on.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Result, StudyDeckError};

const API_VERSION: u8 = 6;

/// Destination deck, note type and naming of created notes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnkiConfig {
    /// AnkiConnect endpoint.
    pub url: String,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    pub deck: String,
    /// Note type (model) name.
    pub note_type: String,
    pub source_field: String,
    pub target_field: String,
    pub note_field: String,
    pub audio_field: String,
    /// Tag shared by every note of the collection.
    pub collection_tag: String,
    /// Prefix of the per-item tag, `{tag_prefix}-{item id}`.
    pub tag_prefix: String,
    /// Prefix of stored audio files, `{audio_prefix}_{item id}_{index}`.
    pub audio_prefix: String,
}

impl Default for AnkiConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8765".to_string(),
            timeout: 30,
            deck: "新概念英语2".to_string(),
            note_type: "背课文".to_string(),
            source_field: "英文".to_string(),
            target_field: "中文".to_string(),
            note_field: "笔记".to_string(),
            audio_field: "发音".to_string(),
            collection_tag: "NCE_Book2".to_string(),
            tag_prefix: "NCE2".to_string(),
            audio_prefix: "nce_tts_2".to_string(),
        }
    }
}

impl AnkiConfig {
    /// Tag shared by all notes of one item.
    pub fn item_tag(&self, item_id: &str) -> String {
        tag_safe(&format!("{}-{}", self.tag_prefix, item_id))
    }

    /// Tag identifying one sentence of one item.
    pub fn sentence_tag(&self, item_id: &str, sentence_index: usize) -> String {
        format!("{}-s{:02}", self.item_tag(item_id), sentence_index)
    }

    /// Search query matching every note of one item in the deck.
    pub fn item_query(&self, item_id: &str) -> String {
        format!("deck:\"{}\" tag:{}", self.deck.replace('"', "\\\""), self.item_tag(item_id))
    }

    pub fn audio_file_name(&self, item_id: &str, sentence_index: usize, extension: &str) -> String {
        format!("{}_{}_{}.{}", self.audio_prefix, item_id, sentence_index, extension)
    }
}

/// Anki tags cannot hold whitespace.
fn tag_safe(tag: &str) -> String {
    tag.split_whitespace().collect::<Vec<_>>().join("_")
}

/// A field value as returned by `notesInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldValue {
    pub value: String,
    #[serde(default)]
    pub order: u32,
}

/// An existing note, as far as the importer cares.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    pub note_id: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: HashMap<String, FieldValue>,
}

/// A note to be created with `addNotes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub deck_name: String,
    pub model_name: String,
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub options: NoteOptions,
}

/// `addNotes` options. AnkiConnect refuses a note whose first field already
/// exists unless `allow_duplicate` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteOptions {
    pub allow_duplicate: bool,
}

/// Destination store for generated cards.
#[async_trait]
pub trait FlashcardStore: Send + Sync {
    async fn deck_names(&self) -> Result<Vec<String>>;

    async fn create_deck(&self, name: &str) -> Result<()>;

    async fn find_notes(&self, query: &str) -> Result<Vec<u64>>;

    async fn notes_info(&self, ids: &[u64]) -> Result<Vec<NoteInfo>>;

    /// Stores a media file and returns the name it was stored under.
    async fn store_media_file(&self, filename: &str, data: &[u8]) -> Result<String>;

    /// Creates notes; `None` marks a note the store refused.
    async fn add_notes(&self, notes: &[NewNote]) -> Result<Vec<Option<u64>>>;
}

/// Envelope of every AnkiConnect reply.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, action: &str) -> Result<Option<T>> {
        match self.error {
            Some(message) => Err(StudyDeckError::AnkiConnect { action: action.to_string(), message }),
            None => Ok(self.result),
        }
    }
}

/// HTTP client for a running AnkiConnect add-on.
#[derive(Debug, Clone)]
pub struct AnkiConnect {
    client: Client,
    url: String,
    timeout: u64,
}

impl AnkiConnect {
    /// `timeout` bounds each request, in seconds.
    pub fn new(url: impl Into<String>, timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(StudyDeckError::HttpError)?;
        Ok(Self { client, url: url.into(), timeout })
    }

    fn request_error(&self, e: reqwest::Error) -> StudyDeckError {
        if e.is_timeout() {
            StudyDeckError::Timeout { timeout: self.timeout }
        } else {
            StudyDeckError::HttpError(e)
        }
    }

    async fn make_request<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Option<T>> {
        let mut body = json!({ "action": action, "version": API_VERSION });
        if let Some(params) = params {
            body["params"] = params;
        }

        tracing::debug!(action, url = %self.url, "AnkiConnect request");
        let response: ApiResponse<T> = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?
            .json()
            .await
            .map_err(|e| self.request_error(e))?;
        response.into_result(action)
    }
}

#[async_trait]
impl FlashcardStore for AnkiConnect {
    async fn deck_names(&self) -> Result<Vec<String>> {
        Ok(self.make_request("deckNames", None).await?.unwrap_or_default())
    }

    async fn create_deck(&self, name: &str) -> Result<()> {
        self.make_request::<u64>("createDeck", Some(json!({ "deck": name }))).await?;
        Ok(())
    }

    async fn find_notes(&self, query: &str) -> Result<Vec<u64>> {
        Ok(self.make_request("findNotes", Some(json!({ "query": query }))).await?.unwrap_or_default())
    }

    async fn notes_info(&self, ids: &[u64]) -> Result<Vec<NoteInfo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.make_request("notesInfo", Some(json!({ "notes": ids }))).await?.unwrap_or_default())
    }

    async fn store_media_file(&self, filename: &str, data: &[u8]) -> Result<String> {
        let params = json!({ "filename": filename, "data": STANDARD.encode(data) });
        let stored: Option<String> = self.make_request("storeMediaFile", Some(params)).await?;
        Ok(stored.unwrap_or_else(|| filename.to_string()))
    }

    async fn add_notes(&self, notes: &[NewNote]) -> Result<Vec<Option<u64>>> {
        let result: Option<Vec<Option<u64>>> =
            self.make_request("addNotes", Some(json!({ "notes": notes }))).await?;
        result.ok_or_else(|| StudyDeckError::AnkiConnect {
            action: "addNotes".to_string(),
            message: "empty result".to_string(),
        })
    }
}
