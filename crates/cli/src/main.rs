mod echo;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use studydeck_core::{
    AnkiConnect, BatchDriver, BatchReport, CheckpointDir, GeminiClient, GoogleTts, Harvester, HttpFetcher, Importer,
    PipelineConfig, PromptSet, unbundle,
};
use tracing_subscriber::EnvFilter;

use crate::echo::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scrape textbook lessons, annotate them with an LLM and import them into Anki
#[derive(Parser, Debug)]
#[command(name = "studydeck")]
#[command(author = "studydeck contributors")]
#[command(version)]
#[command(about = "Turn textbook lessons into annotated flashcards", long_about = None)]
struct Cli {
    /// Configuration file (default: ./studydeck.toml, then the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory of raw item checkpoints
    #[arg(long, global = true, value_name = "DIR")]
    raw_dir: Option<PathBuf>,

    /// Directory of processed item checkpoints
    #[arg(long, global = true, value_name = "DIR")]
    processed_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch lesson pages into raw checkpoints
    Harvest(HarvestArgs),

    /// Split a JSON array of items into raw checkpoints
    Unbundle {
        /// JSON file holding an array of items
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,

        /// Id prefix for entries without an id
        #[arg(long, default_value = "item", value_name = "PREFIX")]
        prefix: String,
    },

    /// Align raw items and generate notes
    Generate(GenerateArgs),

    /// Import processed items into Anki
    Import(ImportArgs),

    /// Harvest, generate and import in one go
    Run {
        #[command(flatten)]
        harvest: HarvestArgs,

        #[command(flatten)]
        generate: GenerateArgs,

        #[command(flatten)]
        import: ImportArgs,
    },

    /// Generate a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Debug)]
struct HarvestArgs {
    /// Book number
    #[arg(long, value_name = "N")]
    book: Option<u32>,

    /// First lesson to harvest
    #[arg(long, value_name = "N")]
    first: Option<u32>,

    /// Last lesson to harvest (inclusive)
    #[arg(long, value_name = "N")]
    last: Option<u32>,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Items processed concurrently
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Directory with align.txt, draft.txt and refine.txt prompt overrides
    #[arg(long, value_name = "DIR")]
    prompts: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ImportArgs {
    /// Google Text-to-Speech API key (default: the Gemini key)
    #[arg(long, env = "GOOGLE_TTS_API_KEY", hide_env_values = true)]
    tts_api_key: Option<String>,

    /// AnkiConnect endpoint
    #[arg(long, value_name = "URL")]
    anki_url: Option<String>,

    /// Target deck
    #[arg(long, value_name = "NAME")]
    deck: Option<String>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "studydeck_core=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();
}

/// Configuration file plus the overrides given on the command line.
fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(dir) = &cli.raw_dir {
        config.paths.raw_dir = dir.clone();
    }
    if let Some(dir) = &cli.processed_dir {
        config.paths.processed_dir = dir.clone();
    }

    match &cli.command {
        Command::Harvest(args) => apply_harvest(&mut config, args),
        Command::Generate(args) => apply_generate(&mut config, args),
        Command::Import(args) => apply_import(&mut config, args),
        Command::Run { harvest, generate, import } => {
            apply_harvest(&mut config, harvest);
            apply_generate(&mut config, generate);
            apply_import(&mut config, import);
        }
        Command::Unbundle { .. } | Command::Completions { .. } => {}
    }

    Ok(config)
}

fn apply_harvest(config: &mut PipelineConfig, args: &HarvestArgs) {
    if let Some(book) = args.book {
        config.source.book = book;
    }
    if let Some(first) = args.first {
        config.source.first_lesson = first;
    }
    if let Some(last) = args.last {
        config.source.last_lesson = last;
    }
}

fn apply_generate(config: &mut PipelineConfig, args: &GenerateArgs) {
    if let Some(workers) = args.workers {
        config.pool.item_workers = workers;
    }
    if let Some(dir) = &args.prompts {
        config.prompts.dir = Some(dir.clone());
    }
}

fn apply_import(config: &mut PipelineConfig, args: &ImportArgs) {
    if let Some(url) = &args.anki_url {
        config.anki.url = url.clone();
    }
    if let Some(deck) = &args.deck {
        config.anki.deck = deck.clone();
    }
}

async fn harvest(config: &PipelineConfig) -> anyhow::Result<BatchReport> {
    let targets = config.source.targets();
    let checkpoints = CheckpointDir::new(&config.paths.raw_dir);
    let fetcher = HttpFetcher::new(config.fetch.clone()).context("Failed to build HTTP client")?;
    let harvester = Harvester::new(fetcher, config.layout.clone(), config.retry.harvest, config.retry.verify_delay);

    print_info(&format!(
        "Harvesting {} lessons of book {} into {}",
        targets.len(),
        config.source.book,
        config.paths.raw_dir.display()
    ));
    Ok(harvester.harvest_all(&targets, &checkpoints).await)
}

async fn generate(config: &PipelineConfig, api_key: Option<&str>) -> anyhow::Result<BatchReport> {
    let api_key = api_key.context("No Gemini API key: pass --api-key or set GEMINI_API_KEY")?;
    let prompts = PromptSet::load(config.prompts.dir.as_deref()).context("Failed to load prompt templates")?;
    let client = GeminiClient::new(api_key).context("Failed to build Gemini client")?;
    let driver = BatchDriver::from_config(config, Arc::new(client), &prompts);

    print_info(&format!(
        "Generating notes from {} into {}",
        config.paths.raw_dir.display(),
        config.paths.processed_dir.display()
    ));
    driver.run().await.context("Failed to list raw checkpoints")
}

async fn import(config: &PipelineConfig, tts_key: Option<&str>) -> anyhow::Result<studydeck_core::ImportReport> {
    let tts_key = tts_key.context("No Text-to-Speech API key: pass --tts-api-key or set GOOGLE_TTS_API_KEY")?;
    let tts = GoogleTts::new(config.tts.clone(), tts_key).context("Failed to build Text-to-Speech client")?;
    let anki = AnkiConnect::new(&config.anki.url, config.anki.timeout).context("Failed to build AnkiConnect client")?;
    let importer = Importer::new(
        Arc::new(anki),
        Arc::new(tts),
        config.anki.clone(),
        config.retry.tts,
    )
    .audio_extension(config.tts.extension());

    print_info(&format!("Importing {} into deck {}", config.paths.processed_dir.display(), config.anki.deck));
    importer
        .import_dir(&CheckpointDir::new(&config.paths.processed_dir), &config.paths.imported_dir())
        .await
        .with_context(|| format!("Failed to reach AnkiConnect at {}", config.anki.url))
}

fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("Failed to create directory: {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "studydeck", &mut io::stdout());
        return Ok(());
    }

    init_tracing(cli.verbose);
    if cli.verbose {
        print_banner();
    }

    let config = load_config(&cli)?;
    tracing::debug!(
        raw = %config.paths.raw_dir.display(),
        processed = %config.paths.processed_dir.display(),
        "Configuration loaded"
    );
    let mut failed = 0;

    match &cli.command {
        Command::Harvest(_) => {
            let report = harvest(&config).await?;
            print_report("Harvest", &report);
            failed += report.failed.len();
        }
        Command::Unbundle { bundle, prefix } => {
            ensure_dir(&config.paths.raw_dir)?;
            let report = unbundle(bundle, &CheckpointDir::new(&config.paths.raw_dir), prefix)
                .with_context(|| format!("Failed to split bundle: {}", bundle.display()))?;
            print_report("Unbundle", &report);
            failed += report.failed.len();
        }
        Command::Generate(args) => {
            let report = generate(&config, args.api_key.as_deref()).await?;
            print_report("Generate", &report);
            failed += report.failed.len();
        }
        Command::Import(args) => {
            let fallback = std::env::var("GEMINI_API_KEY").ok();
            let report = import(&config, args.tts_api_key.as_deref().or(fallback.as_deref())).await?;
            print_import_report(&report);
            failed += report.items.failed.len();
        }
        Command::Run { generate: gen_args, import: import_args, .. } => {
            if gen_args.api_key.is_none() {
                bail!("No Gemini API key: pass --api-key or set GEMINI_API_KEY");
            }

            print_step(1, 3, "Harvesting lesson pages");
            let harvested = harvest(&config).await?;
            print_report("Harvest", &harvested);

            print_step(2, 3, "Generating notes");
            let generated = generate(&config, gen_args.api_key.as_deref()).await?;
            print_report("Generate", &generated);

            print_step(3, 3, "Importing into Anki");
            let key = import_args.tts_api_key.as_deref().or(gen_args.api_key.as_deref());
            let imported = import(&config, key).await?;
            print_import_report(&imported);

            failed += harvested.failed.len() + generated.failed.len() + imported.items.failed.len();
        }
        Command::Completions { .. } => {}
    }

    if failed > 0 {
        print_error(&format!("{} item(s) failed", failed));
        print_warning("Re-run the same command to retry them; finished items are skipped.");
        bail!("{} item(s) failed", failed);
    }

    print_success("Done");
    Ok(())
}
