//! Load command: run image files through the engine.
//!
//! Every path is loaded `--repeat` times, all at once, so repeated paths
//! exercise deduplication and the memory cache. Each load fetches the file,
//! decodes it, fits it into `--width` x `--height` and persists the result
//! as PNG in the disk cache.

use clap::Args;
use image::RgbaImage;
use resloader::config::{format_size, EngineConfig};
use resloader::logging::init_logging;
use resloader::strategy::{FileFetcher, FitCenter, ImageDecoder, ImageEncoder, LoadPipeline};
use resloader::{Engine, LoadError, Metadata, Priority, Resource, ResourceCallback};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Image files to load
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Maximum width of the loaded image
    #[arg(long, default_value = "512")]
    pub width: u32,

    /// Maximum height of the loaded image
    #[arg(long, default_value = "512")]
    pub height: u32,

    /// Number of times each path is requested
    #[arg(long, default_value = "1")]
    pub repeat: usize,

    /// Disk cache directory (overrides config)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Run without the disk cache
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Number of worker threads (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Load at high priority
    #[arg(long)]
    pub urgent: bool,

    /// Write each loaded image as PNG into this directory
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Outcome of one load, sent back from the worker thread.
enum Outcome {
    Loaded {
        path: PathBuf,
        width: u32,
        height: u32,
        bytes: usize,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
}

struct ReportingCallback {
    path: PathBuf,
    output: Option<PathBuf>,
    tx: mpsc::UnboundedSender<Outcome>,
}

impl ResourceCallback<RgbaImage> for ReportingCallback {
    fn on_resource_ready(&self, resource: &Resource<RgbaImage>) {
        let image = resource.get();
        let outcome = match &self.output {
            Some(dir) => {
                let target = output_path(dir, &self.path);
                match image.save(&target) {
                    Ok(()) => None,
                    Err(e) => Some(Outcome::Failed {
                        path: self.path.clone(),
                        error: format!("failed to write {}: {}", target.display(), e),
                    }),
                }
            }
            None => None,
        };
        let outcome = outcome.unwrap_or_else(|| Outcome::Loaded {
            path: self.path.clone(),
            width: image.width(),
            height: image.height(),
            bytes: resource.size(),
        });
        let _ = self.tx.send(outcome);
    }

    fn on_exception(&self, error: &LoadError) {
        let _ = self.tx.send(Outcome::Failed {
            path: self.path.clone(),
            error: error.to_string(),
        });
    }
}

/// `<dir>/<file stem>.png`
fn output_path(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    dir.join(format!("{}.png", stem))
}

fn apply_overrides(args: &LoadArgs, mut config: EngineConfig) -> EngineConfig {
    if let Some(dir) = &args.cache_dir {
        config = config.with_disk_cache_dir(dir);
    }
    if args.no_disk_cache {
        config = config.without_disk_cache();
    }
    if let Some(workers) = args.workers {
        config = config.with_max_workers(workers);
    }
    config
}

/// Run the load command.
pub fn run(args: LoadArgs, config: EngineConfig) -> Result<(), CliError> {
    let config = apply_overrides(&args, config);

    let _logging_guard = init_logging(&config.log_dir, &config.log_file)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir).map_err(|e| {
            CliError::Config(format!("cannot create output directory {}: {}", dir.display(), e))
        })?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(load_all(args, config))
}

async fn load_all(args: LoadArgs, config: EngineConfig) -> Result<(), CliError> {
    let engine: Engine<RgbaImage> =
        Engine::from_config(&config, Handle::current()).map_err(CliError::EngineCreation)?;
    let decoder = Arc::new(ImageDecoder);
    let priority = if args.urgent {
        Priority::High
    } else {
        Priority::Normal
    };

    info!(
        paths = args.paths.len(),
        repeat = args.repeat,
        width = args.width,
        height = args.height,
        "Starting loads"
    );
    let started = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut total = 0;
    for _ in 0..args.repeat {
        for path in &args.paths {
            let pipeline = LoadPipeline::new(
                Arc::new(FileFetcher::new(path)),
                decoder.clone(),
                decoder.clone(),
            )
            .with_transformation(Arc::new(FitCenter))
            .with_encoder(Arc::new(ImageEncoder));
            let callback = Arc::new(ReportingCallback {
                path: path.clone(),
                output: args.output.clone(),
                tx: tx.clone(),
            });

            let id = path.to_string_lossy();
            engine.load(
                &id,
                args.width,
                args.height,
                pipeline,
                Metadata::new(priority),
                callback,
            );
            total += 1;
        }
    }
    // Every callback holds a sender, so the channel closes once all loads reported.
    drop(tx);

    let mut failed = 0;
    while let Some(outcome) = rx.recv().await {
        match outcome {
            Outcome::Loaded {
                path,
                width,
                height,
                bytes,
            } => println!(
                "{}: {}x{} ({})",
                path.display(),
                width,
                height,
                format_size(bytes)
            ),
            Outcome::Failed { path, error } => {
                warn!(path = %path.display(), error = %error, "Load failed");
                println!("{}: FAILED ({})", path.display(), error);
                failed += 1;
            }
        }
    }

    print_summary(&engine, started.elapsed().as_secs_f64());
    engine.log_stats();
    engine.shutdown();

    if failed > 0 {
        return Err(CliError::LoadFailed { failed, total });
    }
    Ok(())
}

fn print_summary(engine: &Engine<RgbaImage>, elapsed_secs: f64) {
    let stats = engine.stats();
    println!();
    println!("Loads:           {} in {:.2}s", stats.total_loads, elapsed_secs);
    println!("Memory hits:     {}", stats.memory_hits);
    println!("Coalesced:       {}", stats.coalesced);
    println!(
        "Runners:         {} started, {} succeeded, {} failed",
        stats.runners_started, stats.runners_succeeded, stats.runners_failed
    );
    println!("Dedup ratio:     {:.1}%", stats.dedup_ratio() * 100.0);
    println!(
        "Memory cache:    {} entries, {}",
        engine.memory_cache().entry_count(),
        format_size(engine.memory_cache().size_bytes())
    );
}
