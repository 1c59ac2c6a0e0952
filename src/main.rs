mod api;
mod cli;
mod db;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ahforge")]
#[command(about = "Asian-handicap forecasts from goal-expectation models")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Run the full forecast pipeline and persist predictions
    Refresh {
        /// Skip the post-refresh integrity check
        #[arg(long)]
        skip_check: bool,
    },
    /// Verify the store holds near-term matches
    Check,
    /// Print row counts and kickoff range from the store
    Probe,
    /// Initialize the database
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port }) => {
            tracing::info!("Starting ahforge API server on port {}", port);
            api::serve(port).await?;
        }
        Some(Commands::Refresh { skip_check }) => {
            tracing::info!("Starting refresh job");
            cli::refresh(skip_check).await?;
        }
        Some(Commands::Check) => {
            cli::check().await?;
        }
        Some(Commands::Probe) => {
            cli::probe().await?;
        }
        Some(Commands::InitDb) => {
            tracing::info!("Initializing database...");
            db::init_database().await?;
        }
        None => {
            // Default to serving
            tracing::info!("Starting ahforge API server on port 3000");
            api::serve(3000).await?;
        }
    }

    Ok(())
}
