//! unistore CLI - Command line interface for storage endpoints.
//!
//! Endpoints are named in a JSON config file (see `EndpointsConfig`); each
//! command takes endpoint names plus `key=value` options for the backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use unistore_common::{Error, Options};
use unistore_storage::{create_default_registry, ByteStream, EndpointsConfig, ProviderRegistry};

#[derive(Parser)]
#[command(name = "unistore")]
#[command(about = "unistore - One interface over many storage backends")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Endpoints configuration file.
    #[arg(short, long, env = "UNISTORE_CONFIG", default_value = "unistore.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered storage providers.
    Providers,

    /// Show metadata for an entry, or list a folder.
    Metadata {
        /// Endpoint name.
        endpoint: String,

        /// Backend option as key=value (repeatable).
        #[arg(long = "opt", value_parser = parse_option)]
        opts: Vec<(String, String)>,
    },

    /// Download an entry to a local file.
    Download {
        /// Endpoint name.
        endpoint: String,

        /// Destination file path.
        #[arg(short, long)]
        out: PathBuf,

        /// Backend option as key=value (repeatable).
        #[arg(long = "opt", value_parser = parse_option)]
        opts: Vec<(String, String)>,
    },

    /// Upload a local file.
    Upload {
        /// Endpoint name.
        endpoint: String,

        /// Source file path.
        #[arg(short, long)]
        file: PathBuf,

        /// Backend option as key=value (repeatable).
        #[arg(long = "opt", value_parser = parse_option)]
        opts: Vec<(String, String)>,
    },

    /// Delete an entry.
    Delete {
        /// Endpoint name.
        endpoint: String,

        /// Backend option as key=value (repeatable).
        #[arg(long = "opt", value_parser = parse_option)]
        opts: Vec<(String, String)>,
    },

    /// Copy an entry between endpoints.
    Copy {
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Move an entry between endpoints.
    Mv {
        #[command(flatten)]
        transfer: TransferArgs,
    },
}

#[derive(clap::Args)]
struct TransferArgs {
    /// Source endpoint name.
    source: String,

    /// Destination endpoint name.
    dest: String,

    /// Source option as key=value (repeatable).
    #[arg(long = "src-opt", value_parser = parse_option)]
    src_opts: Vec<(String, String)>,

    /// Destination option as key=value (repeatable).
    #[arg(long = "dest-opt", value_parser = parse_option)]
    dest_opts: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for JSON output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = create_default_registry();

    match cli.command {
        Commands::Providers => cmd_providers(&registry),

        Commands::Metadata { endpoint, opts } => {
            let config = load_config(&cli.config).await?;
            cmd_metadata(&config, &registry, &endpoint, to_options(opts)).await
        }

        Commands::Download {
            endpoint,
            out,
            opts,
        } => {
            let config = load_config(&cli.config).await?;
            cmd_download(&config, &registry, &endpoint, &out, to_options(opts)).await
        }

        Commands::Upload {
            endpoint,
            file,
            opts,
        } => {
            let config = load_config(&cli.config).await?;
            cmd_upload(&config, &registry, &endpoint, &file, to_options(opts)).await
        }

        Commands::Delete { endpoint, opts } => {
            let config = load_config(&cli.config).await?;
            cmd_delete(&config, &registry, &endpoint, to_options(opts)).await
        }

        Commands::Copy { transfer } => {
            let config = load_config(&cli.config).await?;
            cmd_copy(&config, &registry, transfer).await
        }

        Commands::Mv { transfer } => {
            let config = load_config(&cli.config).await?;
            cmd_move(&config, &registry, transfer).await
        }
    }
}

/// Parse a `key=value` option.
fn parse_option(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn to_options(pairs: Vec<(String, String)>) -> Options {
    pairs
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect()
}

async fn load_config(path: &Path) -> Result<EndpointsConfig> {
    EndpointsConfig::load(path)
        .await
        .with_context(|| format!("Failed to load endpoints from {}", path.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// List registered providers.
fn cmd_providers(registry: &ProviderRegistry) -> Result<()> {
    for name in registry.providers() {
        println!("{}", name);
    }
    Ok(())
}

/// Show metadata.
async fn cmd_metadata(
    config: &EndpointsConfig,
    registry: &ProviderRegistry,
    endpoint: &str,
    options: Options,
) -> Result<()> {
    let provider = config.connect(endpoint, registry)?;
    let response = provider
        .metadata(&options)
        .await
        .context("Failed to fetch metadata")?;
    print_json(&response.serialized())
}

/// Download to a local file.
async fn cmd_download(
    config: &EndpointsConfig,
    registry: &ProviderRegistry,
    endpoint: &str,
    out: &Path,
    options: Options,
) -> Result<()> {
    info!("Downloading from {} to {}", endpoint, out.display());

    let provider = config.connect(endpoint, registry)?;
    let mut stream = provider
        .download(&options)
        .await
        .context("Failed to start download")?;

    let mut file = tokio::fs::File::create(out)
        .await
        .context("Failed to create output file")?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Download interrupted")?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    println!("Downloaded {} bytes to {}", written, out.display());
    Ok(())
}

/// Upload a local file.
async fn cmd_upload(
    config: &EndpointsConfig,
    registry: &ProviderRegistry,
    endpoint: &str,
    file: &Path,
    options: Options,
) -> Result<()> {
    info!("Uploading {} to {}", file.display(), endpoint);

    let provider = config.connect(endpoint, registry)?;
    let source = tokio::fs::File::open(file)
        .await
        .context("Failed to open source file")?;
    let stream: ByteStream = Box::pin(ReaderStream::new(source).map_err(Error::Io));

    let metadata = provider
        .upload(stream, &options)
        .await
        .context("Failed to upload file")?;
    print_json(&metadata.serialized())
}

/// Delete an entry.
async fn cmd_delete(
    config: &EndpointsConfig,
    registry: &ProviderRegistry,
    endpoint: &str,
    options: Options,
) -> Result<()> {
    let provider = config.connect(endpoint, registry)?;
    provider
        .delete(&options)
        .await
        .context("Failed to delete entry")?;
    println!("Deleted");
    Ok(())
}

/// Copy between endpoints.
async fn cmd_copy(
    config: &EndpointsConfig,
    registry: &ProviderRegistry,
    args: TransferArgs,
) -> Result<()> {
    info!("Copying from {} to {}", args.source, args.dest);

    let source = config.connect(&args.source, registry)?;
    let dest = config.connect(&args.dest, registry)?;

    let metadata = source
        .copy(dest.as_ref(), &to_options(args.src_opts), &to_options(args.dest_opts))
        .await
        .context("Copy failed")?;
    print_json(&metadata.serialized())
}

/// Move between endpoints.
///
/// A move whose copy landed but whose source cleanup failed still prints
/// the destination metadata, then exits with the cleanup error.
async fn cmd_move(
    config: &EndpointsConfig,
    registry: &ProviderRegistry,
    args: TransferArgs,
) -> Result<()> {
    info!("Moving from {} to {}", args.source, args.dest);

    let source = config.connect(&args.source, registry)?;
    let dest = config.connect(&args.dest, registry)?;

    match source
        .move_to(dest.as_ref(), &to_options(args.src_opts), &to_options(args.dest_opts))
        .await
    {
        Ok(metadata) => print_json(&metadata.serialized()),
        Err(Error::PartialMove { metadata, source: cause }) => {
            print_json(&metadata.serialized())?;
            Err(anyhow::Error::new(*cause).context("Copied to destination but failed to remove the source"))
        }
        Err(e) => Err(e).context("Move failed"),
    }
}
