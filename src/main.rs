use clap::{Parser, Subcommand};
use rastermark::cache::ImageInfoCache;
use rastermark::config::{self, RastermarkConfig};
use rastermark::imaging::BackendKind;
use rastermark::jpeg::{self, IccProfile};
use rastermark::process::{self, ProcessEvent, ProcessParams};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rastermark")]
#[command(about = "Resize, rotate and watermark images without losing their colour profile")]
#[command(long_about = "\
Resize, rotate and watermark images without losing their colour profile

Images are opened through one of three interchangeable backends:

  raster     reference engine; keeps embedded ICC profiles in JPEG output
  fir        SIMD resampling via fast_image_resize
  imageproc  imageproc geometry; reuses the last decode of the same file

Outputs land in <output>/<hash>/<file>, where the hash covers every
setting that changes pixels. Reruns skip outputs that are already there.

Set RUST_LOG=debug to see watermark cache and ICC segment decisions.
Run 'rastermark gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one image or every supported image under a directory
    Process(ProcessArgs),
    /// Read or embed ICC colour profiles in JPEG files
    #[command(subcommand)]
    Icc(IccCommand),
    /// Print dimensions and format of images
    Info {
        /// Image files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct ProcessArgs {
    /// Image file or directory
    input: PathBuf,
    /// Output directory
    #[arg(long, short, default_value = "out")]
    output: PathBuf,
    /// Config file (default: config.toml next to the input, if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured backend (raster, fir, imageproc)
    #[arg(long)]
    backend: Option<BackendKind>,
    /// Target width in pixels
    #[arg(long)]
    width: Option<u32>,
    /// Target height in pixels
    #[arg(long)]
    height: Option<u32>,
    /// Counter-clockwise rotation in degrees
    #[arg(long, allow_hyphen_values = true)]
    rotate: Option<i32>,
    /// Image type used to pick a quality from [quality.types]
    #[arg(long = "type")]
    image_type: Option<String>,
    /// Reprocess everything, ignoring earlier outputs
    #[arg(long)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum IccCommand {
    /// Write the embedded profile of a JPEG to a file
    Extract {
        jpeg: PathBuf,
        out: PathBuf,
    },
    /// Embed a profile file into a JPEG
    Inject {
        jpeg: PathBuf,
        profile: PathBuf,
        /// Write here instead of modifying the JPEG in place
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Process(args) => run_process(args)?,
        Command::Icc(IccCommand::Extract { jpeg, out }) => {
            let data = std::fs::read(&jpeg)?;
            match jpeg::extract(&data) {
                Some(profile) => {
                    std::fs::write(&out, profile.as_bytes())?;
                    println!(
                        "{}: {} byte profile in {} chunk(s) → {}",
                        jpeg.display(),
                        profile.len(),
                        profile.chunk_count(),
                        out.display()
                    );
                }
                None => println!("{}: no ICC profile", jpeg.display()),
            }
        }
        Command::Icc(IccCommand::Inject {
            jpeg,
            profile,
            output,
        }) => {
            let profile = IccProfile::new(std::fs::read(&profile)?);
            let target = output.unwrap_or_else(|| jpeg.clone());
            let data = std::fs::read(&jpeg)?;
            let injected = jpeg::inject(&data, &profile)?;
            std::fs::write(&target, injected)?;
            println!(
                "{}: embedded {} byte profile in {} chunk(s)",
                target.display(),
                profile.len(),
                profile.chunk_count()
            );
        }
        Command::Info { files } => {
            let mut cache = ImageInfoCache::empty();
            for file in &files {
                match cache.get_or_probe(file) {
                    Ok(info) => {
                        let format = info.format.map_or("unknown", |f| f.extension());
                        println!("{}: {}x{} {}", file.display(), info.width, info.height, format);
                    }
                    Err(e) => println!("{}: {}", file.display(), e),
                }
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn run_process(args: ProcessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_process_config(&args)?;
    init_thread_pool(&config.processing);

    let mut params = ProcessParams::from_config(&config, args.image_type.as_deref());
    if let Some(backend) = args.backend {
        params.backend = backend;
    }
    params.plan.width = args.width;
    params.plan.height = args.height;
    params.plan.rotate = args.rotate;
    params.use_cache = !args.no_cache;

    let inputs = process::collect_inputs(&args.input)?;
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            match event {
                ProcessEvent::Started { total, backend } => {
                    println!("==> Processing {total} image(s) with {backend}");
                }
                ProcessEvent::Processed(file) => {
                    let note = if file.cached { " (cached)" } else { "" };
                    println!(
                        "  {} → {} {}x{}{}",
                        file.source.display(),
                        file.output.display(),
                        file.width,
                        file.height,
                        note
                    );
                }
                ProcessEvent::Failed { source, error } => {
                    println!("  {} ✗ {}", source.display(), error);
                }
            }
        }
    });
    let report = process::process_batch(&inputs, &args.output, &params, Some(tx))?;
    if printer.join().is_err() {
        tracing::warn!("progress printer panicked");
    }

    println!("Watermarks: {}", report.watermark_stats);
    println!("Outputs: {}", report.cache_stats);
    if !report.failed.is_empty() {
        return Err(format!("{} image(s) failed", report.failed.len()).into());
    }
    Ok(())
}

/// `--config` if given, else `config.toml` beside the input, else defaults.
fn load_process_config(args: &ProcessArgs) -> Result<RastermarkConfig, config::ConfigError> {
    if let Some(path) = &args.config {
        return config::load_config_file(path);
    }
    let dir = if args.input.is_dir() {
        args.input.as_path()
    } else {
        args.input.parent().unwrap_or(Path::new("."))
    };
    config::load_config(dir)
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
