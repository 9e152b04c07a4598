//! CLI integration tests
use predicates::prelude::*;
use tempfile::TempDir;

/// Runs the binary inside `home` so no user configuration leaks in.
fn cmd(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("studydeck");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("GEMINI_API_KEY")
        .env_remove("GOOGLE_TTS_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn fixture_dir() -> String {
    format!("{}/../../tests/fixtures", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn test_cli_help_lists_stages() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvest"))
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("unbundle"));
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    cmd(&home).arg("--version").assert().success().stdout(predicate::str::contains("studydeck"));
}

#[test]
fn test_cli_completions() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_studydeck"));
}

#[test]
fn test_cli_unbundle() {
    let home = TempDir::new().unwrap();
    let bundle = home.path().join("articles.json");
    let entries = serde_json::json!([
        {"english": "The sun rose.", "chinese": "太阳升起了。"},
        {"id": "exam_2020", "english": "It rained.", "chinese": "下雨了。", "vocabulary": "rain v. 下雨"},
    ]);
    std::fs::write(&bundle, entries.to_string()).unwrap();

    cmd(&home)
        .args(["unbundle", "articles.json", "--prefix", "article", "--raw-dir", "raw"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Unbundle"));

    assert!(home.path().join("raw/article_001.json").exists());
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(home.path().join("raw/exam_2020.json")).unwrap()).unwrap();
    assert_eq!(stored["glossary_text"], "rain v. 下雨");

    cmd(&home)
        .args(["unbundle", "articles.json", "--prefix", "article", "--raw-dir", "raw"])
        .assert()
        .success()
        .stderr(predicate::str::contains("item(s) failed").not());
}

#[test]
fn test_cli_unbundle_reports_empty_entry() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("bundle.json"), r#"[{"english": "Only one side.", "chinese": ""}]"#).unwrap();

    cmd(&home)
        .args(["unbundle", "bundle.json", "--raw-dir", "raw"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("item_001"));

    assert!(!home.path().join("raw/item_001.json").exists());
}

#[test]
fn test_cli_unbundle_missing_file() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["unbundle", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to split bundle"));
}

#[test]
fn test_cli_harvest_local_pages() {
    let home = TempDir::new().unwrap();
    let config = format!(
        "[source]\nbase_url = \"{}\"\nlocator_template = \"{{base}}/lesson_{{lesson}}.html\"\n\n[paths]\nraw_dir = \"raw\"\n",
        fixture_dir()
    );
    std::fs::write(home.path().join("studydeck.toml"), config).unwrap();

    cmd(&home)
        .args(["harvest", "--first", "1", "--last", "2"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Harvesting 2 lessons"));

    assert!(home.path().join("raw/lesson_002.json").exists());
    let raw = std::fs::read_to_string(home.path().join("raw/lesson_001.json")).unwrap();
    assert!(raw.contains("Last week I went to the theatre."));
}

#[test]
fn test_cli_generate_requires_api_key() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .arg("generate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn test_cli_generate_skips_finished_items() {
    let home = TempDir::new().unwrap();
    let item = serde_json::json!({"id": "lesson_001", "source_text": "A.", "target_text": "甲。"});
    for dir in ["raw", "processed"] {
        std::fs::create_dir_all(home.path().join(dir)).unwrap();
        std::fs::write(home.path().join(dir).join("lesson_001.json"), item.to_string()).unwrap();
    }

    cmd(&home)
        .args(["generate", "--api-key", "dummy", "--raw-dir", "raw", "--processed-dir", "processed"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Generate"));

    let processed = std::fs::read_to_string(home.path().join("processed/lesson_001.json")).unwrap();
    assert_eq!(processed, item.to_string());
}

#[test]
fn test_cli_import_requires_tts_key() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .arg("import")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GOOGLE_TTS_API_KEY"));
}

#[test]
fn test_cli_bad_config() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("broken.toml"), "[source\nbook = ").unwrap();

    cmd(&home)
        .args(["--config", "broken.toml", "generate", "--api-key", "dummy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
