pub mod align;
pub mod anki;
pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod import;
pub mod item;
pub mod llm;
pub mod notes;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod tts;

pub use align::{Aligner, parse_alignment};
pub use anki::{AnkiConfig, AnkiConnect, FlashcardStore, NewNote, NoteInfo, NoteOptions};
pub use bundle::unbundle;
pub use checkpoint::{CheckpointDir, WorkItem};
pub use config::{HarvestTarget, PipelineConfig};
pub use error::{Result, StudyDeckError};
pub use extract::{Capture, FieldRule, PageLayout};
pub use fetch::{FetchConfig, Fetcher, HttpFetcher};
pub use harvest::Harvester;
pub use import::{ImportReport, ImportSummary, Importer};
pub use item::{DraftNote, FinalNote, ProcessedItem, ProcessedSentence, RawItem, SentencePair};
pub use llm::{GeminiClient, GenerationRequest, ModelSpec, ResponseFormat, TextGenerator};
pub use notes::{NoteGenerator, RefineFormat};
pub use parse::Document;
pub use pipeline::BatchDriver;
pub use prompt::{PromptSet, PromptTemplate};
pub use report::{BatchReport, ItemOutcome};
pub use retry::RetryPolicy;
pub use tts::{GoogleTts, SpeechSynthesizer, TtsConfig};
