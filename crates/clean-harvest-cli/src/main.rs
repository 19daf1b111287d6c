//! CleanHarvest CLI — entry point.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use clean_harvest::{
    load_keywords, AssetFetcher, BrowserEngine, ChromiumBrowser, Curator, CuratorConfig,
    GoogleVisionDetector, HttpClient, TextClassifier, VisionCredentials,
};

use commands::{process_keywords, Mode, Overrides};

#[derive(Parser)]
#[command(
    name = "clean-harvest",
    about = "Harvest image results per keyword and keep the originals whose thumbnails carry no text",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    /// Also reads from CLEAN_HARVEST_CONFIG env var.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory under which tmp/ and dumps/ are created.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Category label applied to every keyword.
    #[arg(long, global = true)]
    category: Option<String>,

    /// Keyword list, one per line.
    #[arg(short, long, global = true)]
    keywords: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Show the browser window instead of running headless.
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest, screen, and curate every keyword (default).
    Run,

    /// Populate the per-keyword caches without screening or downloading.
    Harvest,

    /// Screen and download from existing caches only; never opens a browser.
    Curate,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   clean-harvest completions bash > ~/.local/share/bash-completion/completions/clean-harvest
    ///   clean-harvest completions zsh > ~/.zfunc/_clean-harvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mode = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => Mode::Run,
        Commands::Harvest => Mode::Harvest,
        Commands::Curate => Mode::Curate,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "clean-harvest", &mut std::io::stdout());
            return Ok(());
        }
    };

    let mut config =
        CuratorConfig::resolve(cli.config.as_deref()).context("failed to load configuration")?;
    Overrides {
        root: cli.root,
        category: cli.category,
        keywords: cli.keywords,
        headed: cli.headed,
    }
    .apply(&mut config);

    let keywords = load_keywords(&config.keywords_file).with_context(|| {
        format!("failed to read keywords from {}", config.keywords_file.display())
    })?;
    if keywords.is_empty() {
        tracing::warn!("No keywords in {}", config.keywords_file.display());
        return Ok(());
    }
    tracing::info!(
        "{} keywords under '{}' -> {}",
        keywords.len(),
        config.category,
        config.root.display()
    );

    let credentials = VisionCredentials::resolve(&config.vision.credentials_file);
    let detector = GoogleVisionDetector::new(
        config.vision.endpoint.clone(),
        credentials,
        HttpClient::new(std::time::Duration::from_millis(config.vision.timeout_ms)),
    );
    let classifier = TextClassifier::new(Arc::new(detector));
    let fetcher = AssetFetcher::new(HttpClient::new(config.http_timeout()));

    let engine: Option<Arc<dyn BrowserEngine>> = match mode {
        Mode::Curate => None,
        Mode::Run | Mode::Harvest => Some(Arc::new(
            ChromiumBrowser::launch(config.headless)
                .await
                .context("failed to start the browser")?,
        )),
    };

    let curator = match &engine {
        Some(engine) => Curator::new(&config, Arc::clone(engine), classifier, fetcher)?,
        None => Curator::cache_only(&config, classifier, fetcher)?,
    };

    let summary = process_keywords(&curator, mode, &config.category, &keywords).await;

    if let Some(engine) = engine {
        if let Err(e) = engine.shutdown().await {
            tracing::warn!("browser shutdown failed: {e:#}");
        }
    }

    tracing::info!(
        "Done: {} good images, {} keywords aborted",
        summary.good_total(),
        summary.aborted.len()
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
