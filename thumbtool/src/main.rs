use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thumbnail_cache::{Cache, EncoderKind, MemoryKeyValue, Thumbnail, ThumbnailConfig};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "thumbtool")]
#[command(about = "Generate and cache JPEG thumbnails")]
struct Cli {
    /// Cache database path (defaults to the user cache directory)
    #[arg(long, global = true, env = "THUMBTOOL_DB")]
    db: Option<PathBuf>,

    /// Use an in-memory cache that is discarded on exit
    #[arg(long, global = true, conflicts_with = "db")]
    memory: bool,

    /// JPEG quality of generated thumbnails
    #[arg(long, global = true, env = "THUMBTOOL_QUALITY", default_value_t = thumbnail_cache::DEFAULT_JPEG_QUALITY)]
    quality: u8,

    /// Generate thumbnails with an ImageMagick-compatible convert program
    #[arg(long, global = true, env = "THUMBTOOL_CONVERT")]
    convert: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one thumbnail and write it to a file
    Get {
        /// Source image
        path: PathBuf,

        /// Maximum thumbnail width
        #[arg(long, env = "THUMBTOOL_WIDTH")]
        width: u32,

        /// Maximum thumbnail height
        #[arg(long, env = "THUMBTOOL_HEIGHT")]
        height: u32,

        /// Output file (defaults to <stem>.thumb.jpg next to the source)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Look up thumbnails for many images in parallel
    Batch {
        /// Source images
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long, env = "THUMBTOOL_WIDTH")]
        width: u32,

        #[arg(long, env = "THUMBTOOL_HEIGHT")]
        height: u32,
    },

    /// Print the metadata of an image as JSON
    Meta {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Get { path, width, height, out } => {
            let cache = open_cache(&cli)?;
            let result = get(&cache, path, *width, *height, out.as_deref());
            close_cache(cache);
            result
        }
        Commands::Batch { paths, width, height } => {
            let cache = open_cache(&cli)?;
            let result = batch(&cache, paths, *width, *height);
            close_cache(cache);
            result
        }
        Commands::Meta { path } => meta(path),
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "thumbtool=debug,thumbnail_cache=debug"
    } else {
        "thumbtool=info,thumbnail_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_cache(cli: &Cli) -> Result<Cache> {
    let config = ThumbnailConfig {
        jpeg_quality: cli.quality,
        encoder: match &cli.convert {
            Some(program) => EncoderKind::External {
                program: program.clone(),
            },
            None => EncoderKind::Builtin,
        },
    };

    if cli.memory {
        debug!("using in-memory cache");
        return Ok(Cache::with_config(MemoryKeyValue::new(), config));
    }

    let db_path = cli.db.clone().unwrap_or_else(Cache::default_db_path);
    debug!("opening cache at {}", db_path.display());
    let store = thumbnail_cache::SqliteKeyValue::open(&db_path)
        .with_context(|| format!("Failed to open cache database {}", db_path.display()))?;
    Ok(Cache::with_config(store, config))
}

fn close_cache(cache: Cache) {
    if let Err(e) = cache.close() {
        warn!("failed to close cache: {}", e);
    }
}

fn get(cache: &Cache, path: &Path, width: u32, height: u32, out: Option<&Path>) -> Result<()> {
    let thumb = cache
        .lookup(path, width, height)
        .with_context(|| format!("Failed to generate thumbnail for {}", path.display()))?;

    let out = out.map(Path::to_path_buf).unwrap_or_else(|| default_output(path));
    let jpeg = thumb.jpeg().context("Thumbnail has no JPEG data")?;
    fs::write(&out, &*jpeg).with_context(|| format!("Failed to write {}", out.display()))?;

    info!("wrote {}x{} thumbnail to {}", thumb.width(), thumb.height(), out.display());
    print_thumbnail(path, &thumb)
}

fn batch(cache: &Cache, paths: &[PathBuf], width: u32, height: u32) -> Result<()> {
    let results = cache.lookup_batch(paths, width, height, |done, total| {
        info!("processed {}/{}", done, total);
    });

    let mut failed = 0;
    for (path, result) in &results {
        match result {
            Ok(thumb) => println!("{}\t{}x{}", path.display(), thumb.width(), thumb.height()),
            Err(e) => {
                eprintln!("{}\terror: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} thumbnails failed", failed, results.len());
    }
    Ok(())
}

fn meta(path: &Path) -> Result<()> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let metadata = match image_meta::parse(&raw) {
        Ok(metadata) => metadata,
        Err(e) if e.is_unknown_format() => thumbnail_cache::Metadata::default(),
        Err(e) => return Err(e).with_context(|| format!("Failed to parse metadata of {}", path.display())),
    };
    let json = serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    println!("{}", json);
    Ok(())
}

fn print_thumbnail(path: &Path, thumb: &Thumbnail) -> Result<()> {
    let metadata = serde_json::to_string(thumb.metadata()).context("Failed to serialize metadata")?;
    println!("{}\t{}x{}\t{}", path.display(), thumb.width(), thumb.height(), metadata);
    Ok(())
}

/// `photo.jpg` -> `photo.thumb.jpg` in the same directory.
fn default_output(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "thumbnail".to_string());
    path.with_file_name(format!("{}.thumb.jpg", stem))
}
