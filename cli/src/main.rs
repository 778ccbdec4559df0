use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Nearest-neighbor lookup of reference exemplars from sealed artifacts.
#[derive(Debug, Parser)]
#[command(name = "exemplar", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the records closest to a piece of text.
    Query(QueryArgs),

    /// Load both artifacts and report what they contain.
    Check(CheckArgs),

    /// Seal a plaintext artifact with the key from an environment variable.
    Seal(SealArgs),
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Retrieval configuration file.
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Number of neighbors (defaults to the configured count).
    #[arg(short = 'n', long)]
    neighbors: Option<usize>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Text to look up.
    text: String,
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Retrieval configuration file.
    #[arg(long, short = 'c')]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct SealArgs {
    /// Environment variable holding the base64 key.
    #[arg(long, default_value = "EXEMPLAR_ARTIFACT_KEY")]
    key_env: String,

    /// Plaintext artifact.
    input: PathBuf,

    /// Where to write the sealed envelope.
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Query(args) => {
            commands::query(&args.config, &args.text, args.neighbors, args.json).await
        }
        Command::Check(args) => commands::check(&args.config).await,
        Command::Seal(args) => commands::seal(&args.key_env, &args.input, &args.output).await,
    }
}
