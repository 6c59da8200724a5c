use clap::{Parser, Subcommand};
use gallery_prep::config::{self, PipelineConfig};
use gallery_prep::imaging::RustBackend;
use gallery_prep::{manifest, migrate, output, process};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gallery-prep")]
#[command(about = "Image preparation pipeline for a photography site")]
#[command(long_about = "\
Image preparation pipeline for a photography site

Source photos live in category directories under the site root. Each one is
auto-rotated, fitted to a long edge, re-encoded as a progressive JPEG and
listed in a JSON manifest with its dimensions and an inline blur preview.

Site structure:

  public/                          # Site root (--site-root)
  ├── images.manifest.json         # Manifest read by the site
  ├── hero/                        # Category \"hero\" (larger long edge)
  │   └── Dawn Over Hills.JPG
  ├── portraits/
  │   └── Jane 1.png
  └── optimized/                   # Output tree
      ├── hero/dawn-over-hills.jpg
      └── portraits/jane-1.jpg

Manifest fields alt and tags are edited by hand and preserved by every
command. Logging goes to stderr; set RUST_LOG=info for more detail.

Run 'gallery-prep gen-config' to generate a documented gallery-prep.toml.")]
#[command(version)]
struct Cli {
    /// Site root directory (overrides `site_root` from the config file)
    #[arg(long, global = true)]
    site_root: Option<PathBuf>,

    /// Config file
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode every category and replace the manifest
    Prepare {
        /// Disable the processing cache and force re-encoding of all images
        #[arg(long)]
        no_cache: bool,
    },
    /// Re-encode one category's optimized files in place and upsert the manifest
    Reprocess {
        /// Category directory under the output tree, e.g. "portraits"
        category: String,
    },
    /// Move a category's optimized files to another category and rewrite the manifest
    Migrate {
        /// Category to move from, e.g. "n_p"
        from: String,
        /// Category to move to, e.g. "portraits"
        to: String,
    },
    /// Print the manifest, or [] if it is missing or unreadable
    List,
    /// Validate the manifest: unique src values, every asset present
    Check,
    /// Print a stock gallery-prep.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Prepare { no_cache } => {
            let config = load_pipeline_config(&cli)?;
            init_thread_pool(&config.processing);
            println!("==> Preparing images under {}", config.site_root);
            let (tx, printer) = spawn_printer(output::format_process_event);
            let result = process::prepare(&RustBackend::new(), &config, !no_cache, Some(tx))?;
            join_printer(printer)?;
            output::print_process_summary(&result);
        }
        Command::Reprocess { category } => {
            let config = load_pipeline_config(&cli)?;
            init_thread_pool(&config.processing);
            println!("==> Reprocessing {}/{}", config.output_dir, category);
            let (tx, printer) = spawn_printer(output::format_process_event);
            let result = process::reprocess(&RustBackend::new(), &config, category, Some(tx))?;
            join_printer(printer)?;
            output::print_process_summary(&result);
        }
        Command::Migrate { from, to } => {
            let config = load_pipeline_config(&cli)?;
            println!("==> Migrating {} \u{2192} {}", from, to);
            let (tx, printer) = spawn_printer(output::format_migrate_event);
            let report = migrate::migrate(&config, from, to, Some(tx))?;
            join_printer(printer)?;
            output::print_migration_summary(&report);
        }
        Command::List => {
            // Consumers treat [] as "no images yet"; never fail here
            let manifest = match load_pipeline_config(&cli) {
                Ok(config) => manifest::load_or_empty(&config.manifest_path()),
                Err(e) => {
                    tracing::warn!(error = %e, "config unreadable, serving empty collection");
                    manifest::Manifest::new()
                }
            };
            match manifest::to_json(&manifest) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("[]"),
            }
        }
        Command::Check => {
            let config = load_pipeline_config(&cli)?;
            let path = config.manifest_path();
            let loaded = manifest::load(&path)?.unwrap_or_default();
            let report = manifest::check(&loaded, &config.site_root());
            output::print_check_report(&report, &path);
            if !report.is_ok() {
                return Err("manifest check failed".into());
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the config file and apply the `--site-root` override.
fn load_pipeline_config(cli: &Cli) -> Result<PipelineConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(root) = &cli.site_root {
        config.site_root = root.to_string_lossy().into_owned();
    }
    Ok(config)
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// Print events on a dedicated thread as they arrive.
fn spawn_printer<E: Send + 'static>(
    format: fn(&E) -> Vec<String>,
) -> (mpsc::Sender<E>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in format(&event) {
                println!("{}", line);
            }
        }
    });
    (tx, printer)
}

fn join_printer(printer: JoinHandle<()>) -> Result<(), Box<dyn std::error::Error>> {
    printer.join().map_err(|_| "output thread panicked".into())
}
