//! Page retrieval from URLs and local files.
//!
//! The harvester talks to a [`Fetcher`] so tests can script page contents.
//! [`HttpFetcher`] is the real implementation: `http(s)` locators are fetched
//! with reqwest, anything else is read from disk.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::{Result, StudyDeckError};

/// HTTP client configuration for fetching lesson pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Custom User-Agent string.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: 20,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/124.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Source of raw page markup.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the markup behind `locator`.
    async fn fetch(&self, locator: &str) -> Result<String>;
}

/// Fetches `http(s)` locators over the network and reads other locators
/// as file paths.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Builds the underlying HTTP client once.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(StudyDeckError::HttpError)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<String> {
        if is_remote(locator) {
            fetch_url(&self.client, locator, &self.config).await
        } else {
            fetch_file(locator)
        }
    }
}

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Fetches HTML content from a URL.
///
/// Non-success statuses are errors; the body is decoded as text.
pub async fn fetch_url(client: &Client, url: &str, config: &FetchConfig) -> Result<String> {
    let parsed_url = Url::parse(url).map_err(|e| StudyDeckError::InvalidUrl(e.to_string()))?;

    let response = client
        .get(parsed_url)
        .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                StudyDeckError::Timeout { timeout: config.timeout }
            } else {
                StudyDeckError::HttpError(e)
            }
        })?;

    let response = response.error_for_status()?;
    let content = response.text().await?;

    Ok(content)
}

/// Reads HTML content from a local file.
pub fn fetch_file(path: &str) -> Result<String> {
    let path_buf = PathBuf::from(path);

    if !path_buf.exists() {
        Err(StudyDeckError::FileNotFound(path_buf))
    } else {
        fs::read_to_string(&path_buf).map_err(StudyDeckError::from)
    }
}
