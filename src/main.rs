use clap::{Parser, Subcommand};
use lazy_thumbs::config;
use lazy_thumbs::output;
use lazy_thumbs::service::{Thumbnail, ThumbnailError, ThumbnailRequest, ThumbnailService};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lazy-thumbs")]
#[command(about = "Signed, lazily generated image thumbnails")]
#[command(long_about = "\
Signed, lazily generated image thumbnails

Thumbnail URLs are rendered up front and carry a secret derived from the
source path, size, method and extension. The first request for a URL
generates the file; concurrent requests for the same thumbnail get a
retryable 'busy' instead of duplicating the work.

Identifier layout (default):

  <source>/<size>/<method>/<secret><extension>
  animals/kitten.jpg/200x200/crop/3f9c…e1.jpg

Sizes are WxH, Wx or xH (the missing side follows the source aspect ratio).
Methods: crop (fill and trim centered), smart (fill and trim the least
detailed edges), scale (fill the box, no trimming).

Run 'lazy-thumbs gen-config' to generate a documented lazythumbs.toml.
Set RUST_LOG (e.g. RUST_LOG=lazy_thumbs=debug) for more detail.")]
#[command(version)]
struct Cli {
    /// Settings file
    #[arg(long, default_value = "lazythumbs.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Fields naming one thumbnail.
#[derive(clap::Args)]
struct ThumbnailArgs {
    /// Source path, relative to the source storage root
    source: String,
    /// Size as WxH, Wx or xH
    size: String,
    /// crop, smart or scale
    #[arg(default_value = "crop")]
    method: String,
    /// Output extension; defaults to the source's own
    #[arg(long)]
    ext: Option<String>,
}

impl ThumbnailArgs {
    fn extension(&self) -> String {
        self.ext.clone().unwrap_or_else(|| {
            Path::new(&self.source)
                .extension()
                .map_or_else(|| ".jpg".to_string(), |e| format!(".{}", e.to_string_lossy()))
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the proxy URL for a thumbnail without generating it
    Url(ThumbnailArgs),
    /// Generate a thumbnail now (trusted, no secret check)
    Generate {
        #[command(flatten)]
        thumbnail: ThumbnailArgs,
        /// Print a JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Handle an inbound identifier the way the thumbnail endpoint does
    Resolve {
        /// Identifier as it appears after the base URL, percent-decoded
        identifier: String,
        /// Print a JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Print a stock lazythumbs.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Url(args) => {
            let service = load_service(&cli.config)?;
            match service.proxy_url(&args.source, &args.size, &args.method, &args.extension()) {
                Ok(Some(url)) => println!("{url}"),
                Ok(None) => {}
                Err(e) => exit_with(&e),
            }
        }
        Command::Generate { thumbnail, json } => {
            let service = load_service(&cli.config)?;
            let extension = thumbnail.extension();
            let result = service.ensure_thumbnail(ThumbnailRequest {
                source: &thumbnail.source,
                size: &thumbnail.size,
                method: &thumbnail.method,
                extension: &extension,
                secret: None,
            });
            report(&service, result, json)?;
        }
        Command::Resolve { identifier, json } => {
            let service = load_service(&cli.config)?;
            let result = service.ensure_identifier(&identifier);
            report(&service, result, json)?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn load_service(path: &Path) -> Result<ThumbnailService, config::ConfigError> {
    let settings = config::load_config(path)?;
    ThumbnailService::from_settings(settings)
}

fn report(
    service: &ThumbnailService,
    result: Result<Thumbnail, ThumbnailError>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let thumbnail = match result {
        Ok(thumbnail) => thumbnail,
        Err(e) => exit_with(&e),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&output::thumbnail_json(&thumbnail))?);
        return Ok(());
    }
    let delivery = service.deliver(&thumbnail).ok();
    output::print_thumbnail(&thumbnail, delivery.as_ref());
    Ok(())
}

/// Print the error and exit; `75` (EX_TEMPFAIL) tells scripts to retry.
fn exit_with(error: &ThumbnailError) -> ! {
    output::print_error(error);
    std::process::exit(if error.is_retryable() { 75 } else { 1 })
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lazy_thumbs=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
