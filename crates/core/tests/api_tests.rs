//! Library API integration tests
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use studydeck_core::*;

fn get_fixture_path(name: &str) -> String {
    format!("{}/../../tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn fixture_dir() -> String {
    format!("{}/../../tests/fixtures", env!("CARGO_MANIFEST_DIR"))
}

/// Answers by the first word of the prompt.
#[derive(Default)]
struct ScriptedModel {
    calls: AtomicUsize,
    failing_refinement: Option<usize>,
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let head = request.prompt.lines().next().unwrap_or_default();

        match head.split_once(' ') {
            Some(("ALIGN", _)) => Ok("1 | 甲。 | A.\n2 | 乙。 | B.\n3 | 丙。 | C.".to_string()),
            Some(("DRAFT", sentence)) => Ok(format!("draft for {}", sentence)),
            Some(("REFINE", index)) if Some(index.parse::<usize>().unwrap()) == self.failing_refinement => {
                Err(StudyDeckError::EmptyResponse { reason: "SAFETY".to_string() })
            }
            Some(("REFINE", index)) => Ok(format!("note {}\nsecond line", index)),
            _ => Err(StudyDeckError::MalformedResponse(format!("unexpected prompt: {}", head))),
        }
    }
}

fn prompts() -> PromptSet {
    PromptSet {
        align: PromptTemplate::new("align", "ALIGN x\n{source_text}\n{target_text}"),
        draft: PromptTemplate::new("draft", "DRAFT {source_sentence}\n{glossary}"),
        refine: PromptTemplate::new("refine", "REFINE {sentence_index}\n{draft_note}\n{finalized_notes}"),
    }
}

fn pipeline_config(root: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.raw_dir = root.join("raw_data");
    config.paths.processed_dir = root.join("processed_data");
        config.retry.llm = RetryPolicy::immediate(3);
    config.pool.item_delay = Duration::ZERO;
    config.pool.item_workers = 2;
    config
}

fn seed_raw(config: &PipelineConfig, ids: &[&str]) {
    let raw = CheckpointDir::new(&config.paths.raw_dir);
    for id in ids {
        raw.write(id, &RawItem::new(*id, "A. B. C.", "甲。乙。丙。", "a: det.")).unwrap();
    }
}

#[tokio::test]
async fn test_harvest_fixture_page() {
    let harvester = Harvester::new(
        HttpFetcher::new(FetchConfig::default()).unwrap(),
        PageLayout::default(),
        RetryPolicy::immediate(1),
        Duration::ZERO,
    );

    let item = harvester.harvest("lesson_001", &get_fixture_path("lesson_001.html")).await.unwrap();

    assert!(item.source_text.starts_with("Last week I went to the theatre."));
    assert!(item.source_text.ends_with("'This is a private conversation!'"));
    assert!(!item.source_text.contains('\n'));
    assert!(item.target_text.starts_with("上星期我去看戏。"));
    assert_eq!(item.glossary_text.lines().count(), 11);
    assert_eq!(item.glossary_text.lines().next(), Some("private adj. 私人的"));
}

#[tokio::test]
async fn test_harvest_range_from_local_files() {
    let tmp = tempfile::tempdir().unwrap();
    let source = config::SourceConfig {
        base_url: fixture_dir(),
        locator_template: "{base}/lesson_{lesson}.html".to_string(),
        first_lesson: 1,
        last_lesson: 3,
        ..Default::default()
    };
    let checkpoints = CheckpointDir::new(tmp.path());
    let harvester = Harvester::new(
        HttpFetcher::new(FetchConfig::default()).unwrap(),
        PageLayout::default(),
        RetryPolicy::immediate(2),
        Duration::ZERO,
    );

    let report = harvester.harvest_all(&source.targets(), &checkpoints).await;

    assert_eq!(report.committed, vec!["lesson_001", "lesson_002"]);
    assert_eq!(report.failed_ids(), vec!["lesson_003"]);
    let second: RawItem = checkpoints.read("lesson_002").unwrap();
    assert!(second.glossary_text.is_empty());

    let rerun = harvester.harvest_all(&source.targets(), &checkpoints).await;
    assert_eq!(rerun.skipped, vec!["lesson_001", "lesson_002"]);
}

#[tokio::test]
async fn test_rerun_makes_no_model_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    seed_raw(&config, &["lesson_001", "lesson_002"]);

    let model = Arc::new(ScriptedModel::default());
    let driver = BatchDriver::from_config(&config, model.clone(), &prompts());

    let first = driver.run().await.unwrap();
    assert_eq!(first.committed, vec!["lesson_001", "lesson_002"]);
    // per item: 1 alignment + 3 drafts + 3 refinements
    assert_eq!(model.calls.load(Ordering::SeqCst), 14);

    let processed: ProcessedItem = CheckpointDir::new(&config.paths.processed_dir).read("lesson_001").unwrap();
    assert!(processed.is_complete());
    assert_eq!(processed.sentences[2].source_sentence, "C.");
    assert_eq!(processed.sentences[2].target_sentence, "丙。");
    assert_eq!(processed.sentences[0].final_note, "note 1\nsecond line");
    assert_eq!(processed.prompt_version, Some(prompts().version_label()));

    let second = driver.run().await.unwrap();
    assert_eq!(second.skipped, vec!["lesson_001", "lesson_002"]);
    assert_eq!(model.calls.load(Ordering::SeqCst), 14);
}

#[tokio::test]
async fn test_failed_refinement_leaves_no_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    seed_raw(&config, &["lesson_001"]);

    let model = Arc::new(ScriptedModel { failing_refinement: Some(3), ..Default::default() });
    let report = BatchDriver::from_config(&config, model, &prompts()).run().await.unwrap();

    assert_eq!(report.failed_ids(), vec!["lesson_001"]);
    assert!(report.failed[0].1.contains("after 3 attempts"));
    assert!(!CheckpointDir::new(&config.paths.processed_dir).exists("lesson_001"));
}

#[tokio::test]
async fn test_incomplete_raw_item_fails_without_model_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    CheckpointDir::new(&config.paths.raw_dir)
        .write("lesson_009", &RawItem::new("lesson_009", "Only English.", "", ""))
        .unwrap();

    let model = Arc::new(ScriptedModel::default());
    let report = BatchDriver::from_config(&config, model.clone(), &prompts()).run().await.unwrap();

    assert_eq!(report.failed_ids(), vec!["lesson_009"]);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct MemoryStore {
    notes: Mutex<Vec<NewNote>>,
}

#[async_trait]
impl FlashcardStore for MemoryStore {
    async fn deck_names(&self) -> Result<Vec<String>> {
        Ok(vec!["Default".to_string()])
    }

    async fn create_deck(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn find_notes(&self, query: &str) -> Result<Vec<u64>> {
        let tag = query.rsplit("tag:").next().unwrap_or_default();
        let notes = self.notes.lock().unwrap();
        Ok((0..notes.len()).filter(|&i| notes[i].tags.iter().any(|t| t == tag)).map(|i| i as u64).collect())
    }

    async fn notes_info(&self, ids: &[u64]) -> Result<Vec<NoteInfo>> {
        let notes = self.notes.lock().unwrap();
        Ok(ids
            .iter()
            .map(|&id| NoteInfo { note_id: id, tags: notes[id as usize].tags.clone(), fields: Default::default() })
            .collect())
    }

    async fn store_media_file(&self, filename: &str, _data: &[u8]) -> Result<String> {
        Ok(filename.to_string())
    }

    async fn add_notes(&self, notes: &[NewNote]) -> Result<Vec<Option<u64>>> {
        let mut stored = self.notes.lock().unwrap();
        let start = stored.len() as u64;
        stored.extend(notes.iter().cloned());
        Ok((start..start + notes.len() as u64).map(Some).collect())
    }
}

struct SilentTts;

#[async_trait]
impl SpeechSynthesizer for SilentTts {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Ok(vec![0u8; 16])
    }
}

#[tokio::test]
async fn test_generate_then_import_twice() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    seed_raw(&config, &["lesson_001"]);

    BatchDriver::from_config(&config, Arc::new(ScriptedModel::default()), &prompts()).run().await.unwrap();

    let store = Arc::new(MemoryStore::default());
    let importer = Importer::new(store.clone(), Arc::new(SilentTts), config.anki.clone(), RetryPolicy::immediate(3));
    let processed = CheckpointDir::new(&config.paths.processed_dir);

    let report = importer.import_dir(&processed, &config.paths.imported_dir()).await.unwrap();
    assert_eq!(report.notes_added, 3);
    assert!(config.paths.imported_dir().join("lesson_001.json").exists());

    // Put the file back, as if the move had been lost, and import again.
    let item: ProcessedItem = CheckpointDir::new(&config.paths.imported_dir()).read("lesson_001").unwrap();
    processed.write("lesson_001", &item).unwrap();
    let again = importer.import_dir(&processed, &config.paths.imported_dir()).await.unwrap();

    assert_eq!(again.notes_added, 0);
    assert_eq!(again.duplicates, 3);
    assert_eq!(again.items.skipped, vec!["lesson_001"]);

    let notes = store.notes.lock().unwrap();
    assert_eq!(notes.len(), 3);
    let tags: HashSet<_> = notes.iter().flat_map(|n| n.tags.iter().cloned()).collect();
    assert!(tags.contains("NCE2-lesson_001-s03"));
}

#[test]
fn test_config_file_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("studydeck.toml");
    std::fs::write(
        &path,
        r#"
        [source]
        book = 3
        first_lesson = 1
        last_lesson = 2

        [models]
        refine_format = "json"

        [anki]
        deck = "New Concept English 3"

        [tts]
        voice_name = "en-GB-Standard-A"
        "#,
    )
    .unwrap();

    let config = PipelineConfig::load(Some(&path)).unwrap();
    assert_eq!(config.source.targets().len(), 2);
    assert_eq!(config.source.locator(2), "http://www.newconceptenglish.com/index.php?id=course-3-002");
    assert_eq!(config.models.refine_format, RefineFormat::Json);
    assert_eq!(config.anki.deck, "New Concept English 3");
    assert_eq!(config.anki.note_type, "背课文");
    assert_eq!(config.tts.voice_name, "en-GB-Standard-A");
}
