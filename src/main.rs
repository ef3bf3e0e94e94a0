use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(author, version, about = "Queue local media files for download, one at a time", long_about = None)]
struct Cli {
    /// SQLite database file (defaults to the platform data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory downloaded media is written to; saved for later runs
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    mediaq::run(mediaq::RunOptions {
        db_path: cli.db,
        download_dir: cli.download_dir,
    })
    .await
}
