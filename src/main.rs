use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use weai::config::Settings;
use weai::llm::backend::{BackendLoader, ScriptedBackend, ScriptedLoader};
use weai::llm::{ChatService, ModelHandle};

mod chat;

/// weai - chat with a local language model
#[derive(Parser)]
#[command(name = "weai")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding default.toml and an optional local.toml
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive multi-turn chat (default)
    Chat,

    /// Answer a single prompt and exit
    Ask {
        /// Prompt text
        prompt: String,
        /// Print the wire result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask for a short analysis of a text file
    Analyze {
        /// File to analyze
        file: PathBuf,
    },
}

/// Main entry point for weai
///
/// Loads settings, installs logging, loads the model once and hands it to
/// the chat service used by every command.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load settings first
    let settings = Settings::from_dir(&cli.config_dir)
        .with_context(|| format!("failed to load settings from {}", cli.config_dir.display()))?;

    let _guard = init_logging(&settings, cli.verbose);
    info!("weai starting up...");

    let model = match load_model(&settings).await {
        Ok(model) => model,
        Err(e) => {
            error!("Model load failed: {:#}", e);
            return Err(e);
        }
    };

    let service = ChatService::new(model, settings.session_config());

    let result = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat::chat_loop(&service).await,
        Commands::Ask { prompt, json } => ask(&service, &prompt, json).await,
        Commands::Analyze { file } => analyze(&service, &file).await,
    };

    service.shutdown();
    result
}

/// Installs the global subscriber. Logs go to a daily rolling file when a
/// log directory is configured, stderr otherwise.
fn init_logging(settings: &Settings, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { settings.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match settings.logging.file.as_deref() {
        Some(dir) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "weai");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                // Disable ANSI colors for cleaner log files
                .with_ansi(false)
                .with_line_number(true)
                .with_file(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
            None
        }
    }
}

fn loader_for(backend: &str) -> Result<Box<dyn BackendLoader>> {
    match backend {
        "echo" => Ok(Box::new(ScriptedLoader::new(ScriptedBackend::echo_reversed()))),
        #[cfg(feature = "llama")]
        "llama" => Ok(Box::new(weai::llm::backend::LlamaLoader)),
        #[cfg(not(feature = "llama"))]
        "llama" => anyhow::bail!("this build has no llama.cpp support; rebuild with `--features llama`"),
        other => anyhow::bail!("unknown backend: {}", other),
    }
}

async fn load_model(settings: &Settings) -> Result<Arc<ModelHandle>> {
    let loader = loader_for(&settings.model.backend)?;
    let params = settings.model_params();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Loading {}...", params.path.display()));

    let loaded = tokio::task::spawn_blocking(move || ModelHandle::load(&params, loader.as_ref())).await;
    pb.finish_and_clear();

    let model = loaded.context("model loading task failed")??;
    info!(model = ?model.summary(), "Model ready");
    Ok(Arc::new(model))
}

async fn ask(service: &ChatService, prompt: &str, json: bool) -> Result<()> {
    if json {
        let result = service.respond(prompt).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let text = service.generate(prompt).await?;
        println!("{}", text);
    }
    Ok(())
}

async fn analyze(service: &ChatService, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let text = service.analyze_file(&filename, &content).await?;
    println!("{}", text);
    Ok(())
}
