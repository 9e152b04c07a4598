//! Pipeline configuration.
//!
//! Book number, model names, retry bounds, pool sizes and deck naming all
//! live in [`PipelineConfig`], which is handed to each component at
//! construction. There is no process-wide state.
//!
//! The configuration is read from TOML. Every section is optional and falls
//! back to its defaults:
//!
//! ```toml
//! [source]
//! book = 3
//! last_lesson = 60
//!
//! [pool]
//! item_workers = 2
//!
//! [models.refine]
//! name = "gemini-2.5-pro"
//! temperature = 0.5
//!
//! [anki]
//! deck = "New Concept English 3"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::anki::AnkiConfig;
use crate::extract::PageLayout;
use crate::fetch::FetchConfig;
use crate::llm::ModelSpec;
use crate::notes::RefineFormat;
use crate::retry::RetryPolicy;
use crate::tts::TtsConfig;
use crate::{Result, StudyDeckError};

/// File name looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "studydeck.toml";

/// Root configuration object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub layout: PageLayout,
    pub fetch: FetchConfig,
    pub paths: PathsConfig,
    pub retry: RetryConfig,
    pub pool: PoolConfig,
    pub models: ModelsConfig,
    pub prompts: PromptsConfig,
    pub anki: AnkiConfig,
    pub tts: TtsConfig,
}

impl PipelineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StudyDeckError::ConfigError(e.to_string()))
    }

    /// Reads a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StudyDeckError::FileNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| StudyDeckError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    /// Loads the configuration from `path`, or from the first default
    /// location that exists, or falls back to built-in defaults.
    ///
    /// Default locations are `./studydeck.toml` and
    /// `<user config dir>/studydeck/config.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_locations().into_iter().find(|p| p.exists()) {
            Some(found) => {
                tracing::debug!(path = %found.display(), "Loading configuration");
                Self::from_file(&found)
            }
            None => Ok(Self::default()),
        }
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("studydeck").join("config.toml"));
        }
        locations
    }
}

/// Where lesson pages come from and how they are numbered.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Substituted for `{base}` in the locator template.
    pub base_url: String,
    /// Locator template with `{base}`, `{book}` and `{lesson}` placeholders.
    pub locator_template: String,
    /// Item id template, same placeholders as the locator.
    pub id_template: String,
    pub book: u32,
    pub first_lesson: u32,
    pub last_lesson: u32,
    /// Zero padding applied to `{lesson}`.
    pub lesson_width: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://www.newconceptenglish.com/index.php".to_string(),
            locator_template: "{base}?id=course-{book}-{lesson}".to_string(),
            id_template: "lesson_{lesson}".to_string(),
            book: 2,
            first_lesson: 1,
            last_lesson: 96,
            lesson_width: 3,
        }
    }
}

/// One page to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestTarget {
    pub id: String,
    pub locator: String,
}

impl SourceConfig {
    fn render(&self, template: &str, lesson: u32) -> String {
        template
            .replace("{base}", &self.base_url)
            .replace("{book}", &self.book.to_string())
            .replace("{lesson}", &format!("{:0width$}", lesson, width = self.lesson_width))
    }

    /// Locator of one lesson page.
    pub fn locator(&self, lesson: u32) -> String {
        self.render(&self.locator_template, lesson)
    }

    /// Checkpoint id of one lesson.
    pub fn item_id(&self, lesson: u32) -> String {
        self.render(&self.id_template, lesson)
    }

    /// All targets in the configured lesson range, in order.
    pub fn targets(&self) -> Vec<HarvestTarget> {
        (self.first_lesson..=self.last_lesson)
            .map(|lesson| HarvestTarget { id: self.item_id(lesson), locator: self.locator(lesson) })
            .collect()
    }
}

/// Stage directories.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Harvester output, note generator input.
    pub raw_dir: PathBuf,
    /// Note generator output, importer input.
    pub processed_dir: PathBuf,
    /// Where imported files are moved to; `<processed_dir>/imported` when unset.
    pub imported_dir: Option<PathBuf>,
}

impl PathsConfig {
    /// Resolved destination of imported files.
    pub fn imported_dir(&self) -> PathBuf {
        self.imported_dir.clone().unwrap_or_else(|| self.processed_dir.join("imported"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("raw_data"),
            processed_dir: PathBuf::from("processed_data"),
            imported_dir: None,
        }
    }
}

/// Retry policies per external service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per lesson page; each attempt fetches twice.
    pub harvest: RetryPolicy,
    /// Pause between the two fetches of one attempt.
    #[serde(with = "duration_secs")]
    pub verify_delay: Duration,
    pub llm: RetryPolicy,
    pub tts: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            harvest: RetryPolicy::new(3, Duration::from_secs(2)),
            verify_delay: Duration::from_secs(1),
            llm: RetryPolicy::new(3, Duration::from_secs(5)),
            tts: RetryPolicy::new(3, Duration::from_secs(5)),
        }
    }
}

/// Concurrency bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Items processed concurrently by the batch driver (1 = sequential).
    pub item_workers: usize,
    /// Draft requests in flight per item.
    pub draft_workers: usize,
    /// Pause after each item, to go easy on the APIs.
    #[serde(with = "duration_secs")]
    pub item_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { item_workers: 1, draft_workers: 10, item_delay: Duration::from_secs(1) }
    }
}

/// Model used by each LLM step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub align: ModelSpec,
    pub draft: ModelSpec,
    pub refine: ModelSpec,
    pub refine_format: RefineFormat,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            align: ModelSpec::new("gemini-2.5-flash").temperature(0.0).max_output_tokens(4096),
            draft: ModelSpec::new("gemini-2.5-flash").temperature(0.4),
            refine: ModelSpec::new("gemini-2.5-pro").temperature(0.5).timeout(300),
            refine_format: RefineFormat::default(),
        }
    }
}

/// Prompt template overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory holding `align.txt`, `draft.txt` and/or `refine.txt`.
    pub dir: Option<PathBuf>,
}

/// Serde helper reading durations as (fractional) seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
