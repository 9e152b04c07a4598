//! Speech synthesis through the Google Cloud `text:synthesize` REST API.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::llm::api_error_message;
use crate::{Result, StudyDeckError};

/// Voice and endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub endpoint: String,
    pub language_code: String,
    pub voice_name: String,
    /// `MP3`, `OGG_OPUS` or `LINEAR16`.
    pub audio_encoding: String,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://texttospeech.googleapis.com/v1/text:synthesize".to_string(),
            language_code: "en-US".to_string(),
            voice_name: "en-US-Standard-J".to_string(),
            audio_encoding: "MP3".to_string(),
            timeout: 60,
        }
    }
}

impl TtsConfig {
    /// File extension matching the audio encoding.
    pub fn extension(&self) -> &'static str {
        match self.audio_encoding.as_str() {
            "OGG_OPUS" => "ogg",
            "LINEAR16" => "wav",
            _ => "mp3",
        }
    }
}

/// Turns a sentence into audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Google Cloud Text-to-Speech client authenticated with an API key.
#[derive(Debug, Clone)]
pub struct GoogleTts {
    client: Client,
    config: TtsConfig,
    api_key: String,
}

impl GoogleTts {
    pub fn new(config: TtsConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(StudyDeckError::HttpError)?;
        Ok(Self { client, config, api_key: api_key.into() })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(voice = %self.config.voice_name, chars = text.chars().count(), "Synthesizing speech");

        let body = json!({
            "input": { "text": text },
            "voice": { "languageCode": self.config.language_code, "name": self.config.voice_name },
            "audioConfig": { "audioEncoding": self.config.audio_encoding },
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StudyDeckError::Timeout { timeout: self.config.timeout }
                } else {
                    StudyDeckError::HttpError(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }

        decode_audio(&text)
    }
}

/// Maps an error response, singling out a disabled API.
///
/// A freshly enabled API keeps answering `SERVICE_DISABLED` for a few
/// minutes, so that case is reported as transient.
fn classify_failure(status: u16, body: &str) -> StudyDeckError {
    let message = api_error_message(body);
    if body.contains("SERVICE_DISABLED") {
        StudyDeckError::ServiceDisabled(message)
    } else {
        StudyDeckError::Api { service: "Text-to-Speech".to_string(), status, message }
    }
}

fn decode_audio(body: &str) -> Result<Vec<u8>> {
    let parsed: SynthesizeResponse = serde_json::from_str(body)?;
    if parsed.audio_content.is_empty() {
        return Err(StudyDeckError::EmptyResponse { reason: "no audioContent".to_string() });
    }
    STANDARD
        .decode(parsed.audio_content.as_bytes())
        .map_err(|e| StudyDeckError::MalformedResponse(format!("audioContent is not base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_audio() {
        let body = r#"{"audioContent":"SUQzBA=="}"#;
        assert_eq!(decode_audio(body).unwrap(), b"ID3\x04");
    }

    #[test]
    fn test_decode_audio_missing_or_invalid() {
        assert!(matches!(decode_audio("{}"), Err(StudyDeckError::EmptyResponse { .. })));
        assert!(matches!(decode_audio(r#"{"audioContent":"%%%"}"#), Err(StudyDeckError::MalformedResponse(_))));
    }

    #[test]
    fn test_service_disabled_is_transient() {
        let body = r#"{"error":{"code":403,"message":"Cloud Text-to-Speech API has not been used","status":"PERMISSION_DENIED","details":[{"reason":"SERVICE_DISABLED"}]}}"#;
        let err = classify_failure(403, body);
        assert!(matches!(err, StudyDeckError::ServiceDisabled(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_permission_denied_is_not_transient() {
        let body = r#"{"error":{"code":403,"message":"API key not valid","status":"PERMISSION_DENIED"}}"#;
        let err = classify_failure(403, body);
        assert!(matches!(err, StudyDeckError::Api { status: 403, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_extension() {
        assert_eq!(TtsConfig::default().extension(), "mp3");
        let ogg = TtsConfig { audio_encoding: "OGG_OPUS".into(), ..Default::default() };
        assert_eq!(ogg.extension(), "ogg");
    }
}
