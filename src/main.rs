use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "doorstep")]
#[command(version, about = "Door-to-door canvassing tracker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the tracker server
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "4242")]
        port: u16,

        /// Database path
        #[arg(long, default_value = ".doorstep/tracker.db")]
        db_path: std::path::PathBuf,

        /// Auto-open browser after server starts
        #[arg(long)]
        open: bool,

        /// Enable dev mode (bind all interfaces, permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Initialize the database and exit
    Init {
        /// Database path
        #[arg(long, default_value = ".doorstep/tracker.db")]
        db_path: std::path::PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("doorstep=info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            db_path,
            open,
            dev,
        } => {
            cmd::cmd_serve(port, db_path, open, dev).await?;
        }
        Commands::Init { db_path } => {
            cmd::cmd_init_db(&db_path)?;
        }
    }

    Ok(())
}
