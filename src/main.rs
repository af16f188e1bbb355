//! Mural CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "mural")]
#[command(about = "Collaborative shared canvas relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "9400")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Workspace to serve
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },
    /// Print a workspace's saved canvas as JSON
    Export {
        /// Workspace to export
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },
    /// Delete everything persisted under the data root
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("mural={}", log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Mural v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data root: {}", cli.root.display());

    match cli.command {
        Commands::Serve {
            port,
            host,
            workspace,
        } => commands::serve(cli.root, host, port, workspace).await,
        Commands::Export { workspace } => commands::export(cli.root, workspace),
        Commands::Clear => commands::clear(cli.root),
        Commands::Version => {
            println!("Mural v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
