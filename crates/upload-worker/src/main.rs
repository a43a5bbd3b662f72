use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use upload_core::{
    run_load_test, sampler_for, Config, HttpUploader, MemoryMode, MockUploader, Uploader,
};

#[derive(Parser, Debug)]
#[command(name = "upload-worker")]
#[command(about = "Upload load test worker - sends multipart uploads and measures target memory growth")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upload mode: mock or http
    #[arg(long, default_value = "http")]
    mode: String,

    /// Upload endpoint (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Corpus directory (overrides config)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Total uploads to issue (overrides config)
    #[arg(long)]
    total_requests: Option<u64>,

    /// Maximum concurrent uploads (overrides config)
    #[arg(long)]
    concurrency: Option<u32>,

    /// Post-upload pacing delay in milliseconds (overrides config)
    #[arg(long)]
    pacing_ms: Option<u64>,

    /// Bearer token (overrides config)
    #[arg(long, env = "UPLOAD_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Memory sampler: docker, process or none (overrides config)
    #[arg(long)]
    memory_mode: Option<MemoryMode>,

    /// Container id/name or pid to sample (overrides config)
    #[arg(long)]
    container: Option<String>,

    /// Directory for the JSON results file
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = load_config(&args)?;
    config.validate()?;

    info!(
        url = %config.target.url,
        mode = %args.mode,
        total_requests = config.load.total_requests,
        concurrency = config.load.concurrency,
        "Starting upload worker"
    );

    let uploader: Arc<dyn Uploader> = match args.mode.as_str() {
        "mock" => Arc::new(MockUploader::new(5)), // 5ms simulated latency
        "http" => Arc::new(
            HttpUploader::new(&config.target).context("Failed to create HTTP uploader")?,
        ),
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", args.mode),
    };

    let sampler = sampler_for(&config.memory).context("Failed to create memory sampler")?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = run_load_test(&config, uploader, sampler.as_deref(), shutdown).await?;

    match outcome.report.save(&args.results_dir, &outcome.file_stamp()) {
        Ok(path) => info!("Results written to {:?}", path),
        Err(e) => warn!("Failed to write results: {e:#}"),
    }
    print!("{}", outcome.report.render());

    // A failed final sample is returned here and printed once by the runtime.
    outcome.into_result().map(|_| ())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    if let Some(url) = &args.url {
        config.target.url = url.clone();
    }
    if let Some(token) = &args.bearer_token {
        config.target.bearer_token = token.clone();
    }
    if let Some(path) = &args.corpus {
        config.corpus.path = path.clone();
    }
    if let Some(total) = args.total_requests {
        config.load.total_requests = total;
    }
    if let Some(concurrency) = args.concurrency {
        config.load.concurrency = concurrency;
    }
    if let Some(pacing_ms) = args.pacing_ms {
        config.load.pacing_ms = pacing_ms;
    }
    if let Some(mode) = args.memory_mode {
        config.memory.mode = mode;
    }
    if let Some(container) = &args.container {
        config.memory.target_id = container.clone();
    }
    Ok(config)
}
