use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use travelog_images::domain::{CacheMode, LogicalSize};
use travelog_images::infrastructure::config::{Command, SizeArgs};
use travelog_images::infrastructure::{
    AppConfig, CliArgs, ImagePipeline, PrefetchCandidate, Prefetcher, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = match &args.config {
        Some(path) => {
            StorageManager::with_dir(path.parent().map(Path::to_path_buf).unwrap_or_default())
        }
        None => StorageManager::new()?,
    };
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

const fn logical_size(size: SizeArgs) -> LogicalSize {
    LogicalSize::new(size.width, size.height)
}

async fn fetch(
    config: &AppConfig,
    url: &str,
    size: SizeArgs,
    transient: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let pipeline = ImagePipeline::open(config).await?;
    let mode = if transient {
        CacheMode::Transient
    } else {
        CacheMode::Persistent
    };
    let key = pipeline.resolve_cache_key(url, logical_size(size));
    let loaded = pipeline.load(&key, url, mode).await?;

    println!(
        "{} -> {}x{} from {}",
        key,
        loaded.image.width(),
        loaded.image.height(),
        loaded.source
    );

    if let Some(path) = out {
        let image = loaded.image.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || image.save(target)).await??;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

async fn prefetch(config: &AppConfig, urls: Vec<String>, size: SizeArgs) -> Result<()> {
    let pipeline = Arc::new(ImagePipeline::open(config).await?);
    let prefetcher = Prefetcher::new(
        pipeline.clone(),
        config.prefetch.batch_limit,
        config.prefetch.max_concurrent,
    );

    let candidates: Vec<_> = urls
        .into_iter()
        .map(|url| PrefetchCandidate::new(url, logical_size(size)))
        .collect();

    let mut queued = 0;
    for batch in candidates.chunks(config.prefetch.batch_limit.max(1)) {
        queued += prefetcher.prefetch(batch.iter().cloned());
        prefetcher.wait_idle().await;
    }

    let memory = pipeline.memory();
    println!(
        "Prefetched {queued} of {} images; {} resident ({} bytes)",
        candidates.len(),
        memory.len(),
        memory.total_cost()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = travelog_images::VERSION, "Starting {}", travelog_images::NAME);

    match args.command {
        Command::Fetch {
            url,
            size,
            transient,
            out,
        } => fetch(&config, &url, size, transient, out).await?,
        Command::Prefetch { urls, size } => prefetch(&config, urls, size).await?,
        Command::Clear => {
            let pipeline = ImagePipeline::open(&config).await?;
            pipeline.clear_caches().await;
            println!("Cleared caches in {}", config.cache.effective_disk_dir().display());
        }
        Command::Config => {
            if let Some(path) = config.effective_config_path() {
                println!("# {}", path.display());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
