//! Background Removal API server
//!
//! Parses flags, makes sure the model is available, loads it once and serves
//! the HTTP routes until Ctrl+C or SIGTERM.

use super::config::CliConfigBuilder;
use crate::{
    api,
    cache::ModelCache,
    config::ServerConfig,
    download::{validate_model_url, ModelDownloader},
    models::{ModelSource, ModelSpec},
    processor::BackgroundRemovalProcessor,
    remover::ModelBackgroundRemover,
    tracing_config::{output_for, TracingConfig, TracingFormat},
    utils::ModelSpecParser,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// HTTP service that removes image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bg-remover-api")]
pub struct Cli {
    /// Interface to bind
    #[arg(long, env = "BG_REMOVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "BG_REMOVER_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Origin allowed to call the API from a browser (repeatable)
    #[arg(
        long = "allowed-origin",
        env = "BG_REMOVER_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = crate::config::DEFAULT_ALLOWED_ORIGIN
    )]
    pub allowed_origins: Vec<String>,

    /// Do not allow credentials on cross-origin requests (required for a "*" origin)
    #[arg(long)]
    pub no_credentials: bool,

    /// Largest accepted upload in MiB
    #[arg(long, env = "BG_REMOVER_MAX_UPLOAD_MB", default_value_t = 10)]
    pub max_upload_mb: usize,

    /// Model URL, cached model id or path to a model folder or .onnx file
    /// [default: <https://huggingface.co/imgly/isnet-general-onnx>]
    #[arg(short, long, env = "BG_REMOVER_MODEL")]
    pub model: Option<String>,

    /// Model variant (fp16, fp32) [default: fp32 when available]
    #[arg(long)]
    pub variant: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long, env = "BG_REMOVER_EXECUTION_PROVIDER", default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Use custom model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (console, compact, json)
    #[arg(long, env = "BG_REMOVER_LOG_FORMAT", default_value = "console")]
    pub log_format: TracingFormat,

    /// Also write logs to this file (daily rotation)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model into the cache and exit
    #[arg(long)]
    pub only_download: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let config = CliConfigBuilder::from_cli(&cli)?;
    let cache = ModelCache::from_override(cli.cache_dir.as_deref())
        .context("Failed to initialize model cache")?;

    if cli.only_download {
        return download_model_only(&cli, cache).await;
    }

    ensure_model_available(&cli, &config.removal.model_spec, &cache).await?;
    serve(config).await
}

fn init_tracing(cli: &Cli) -> Result<crate::tracing_config::TracingGuard> {
    let mut tracing = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format)
        .with_output(output_for(cli.log_file.clone()));

    if cli.verbose == 0 {
        if let Ok(directives) = std::env::var("RUST_LOG") {
            tracing = tracing.with_env_filter(directives);
        }
    }

    tracing.init()
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!(
        backend = %config.removal.backend_type,
        provider = %config.removal.execution_provider,
        model = %config.removal.model_spec.source.display_name(),
        "Loading background removal model"
    );

    let processor = BackgroundRemovalProcessor::new(config.removal.clone())
        .context("Failed to create background removal processor")?;
    let remover = ModelBackgroundRemover::new(processor);
    remover.warm_up().await.context("Failed to load model")?;

    let app = api::router(Arc::new(remover), &config).context("Failed to build router")?;

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(
        address = %listener.local_addr().context("Listener has no local address")?,
        origins = ?config.cors.allowed_origins,
        "Background Removal API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolves once Ctrl+C or SIGTERM arrives
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Download the model the server would use when it is not cached yet
///
/// URLs are always fetched (a cached copy is reused). A missing default model
/// is fetched from its repository; any other missing cached id is an error.
async fn ensure_model_available(cli: &Cli, spec: &ModelSpec, cache: &ModelCache) -> Result<()> {
    if let Some(url) = cli.model.as_deref().and_then(ModelSpecParser::download_url) {
        download(url, cache.clone()).await?;
        return Ok(());
    }

    let ModelSource::Downloaded(model_id) = &spec.source else {
        return Ok(());
    };
    if cache.is_model_cached(model_id) {
        return Ok(());
    }

    let default_url = ModelCache::get_default_model_url();
    if *model_id == ModelCache::url_to_model_id(default_url) {
        info!("Default model not cached, downloading it");
        download(default_url, cache.clone()).await?;
        return Ok(());
    }

    anyhow::bail!(
        "Model '{model_id}' not found in cache {}. Pass its URL with --model to download it.",
        cache.cache_dir().display()
    )
}

async fn download(url: &str, cache: ModelCache) -> Result<String> {
    let downloader = ModelDownloader::new(cache).context("Failed to create model downloader")?;
    downloader
        .download_model(url, true)
        .await
        .with_context(|| format!("Failed to download model from {url}"))
}

async fn download_model_only(cli: &Cli, cache: ModelCache) -> Result<()> {
    let model_url = match cli.model.as_deref() {
        Some(model) => ModelSpecParser::download_url(model)
            .with_context(|| {
                format!(
                    "--only-download requires a URL like {}, got '{model}'",
                    ModelCache::get_default_model_url()
                )
            })?
            .to_string(),
        None => ModelCache::get_default_model_url().to_string(),
    };
    validate_model_url(&model_url).context("Invalid model URL")?;

    let downloader = ModelDownloader::new(cache).context("Failed to create model downloader")?;
    let model_id = downloader
        .download_model(&model_url, true)
        .await
        .with_context(|| format!("Failed to download model from {model_url}"))?;

    println!("Model ID: {model_id}");
    println!(
        "Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    println!("To serve it: bg-remover-api --model {model_id}");
    Ok(())
}

fn show_provider_diagnostics() {
    println!("Backend and Execution Provider Diagnostics");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");

    #[cfg(feature = "onnx")]
    print_providers("onnx", &crate::backends::OnnxBackend::list_providers());
    #[cfg(feature = "tract")]
    print_providers("tract", &crate::backends::TractBackend::list_providers());

    println!("\nUsage Examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider onnx:coreml  # Use Apple CoreML (macOS)");
    println!("  --execution-provider onnx:cpu     # Force ONNX CPU execution");
    println!("  --execution-provider tract:cpu    # Use pure Rust Tract backend");
}

#[cfg(any(feature = "onnx", feature = "tract"))]
fn print_providers(backend: &str, providers: &[(String, bool, String)]) {
    println!("\n{backend}:");
    for (name, available, description) in providers {
        let status = if *available { "available" } else { "not available" };
        println!("  {name}: {status} - {description}");
    }
}
