use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zet_server::{create_router, AppState, ServerConfig};
use zet_storage::Database;

#[derive(Parser)]
#[command(name = "zet")]
#[command(about = "Zettelkasten notes with links, backlinks and workspaces", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "ZET_DB_PATH", default_value = "./zettel.db", global = true)]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        #[arg(long, env = "ZET_ADDR", default_value = "127.0.0.1:21960")]
        addr: String,

        /// Disable client caching on every response
        #[arg(long, env = "ZET_NO_CACHE")]
        no_cache: bool,
    },
    /// Print zettel, link and workspace counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db = open_database(&cli.db_path)?;

    match cli.command {
        Command::Serve { addr, no_cache } => {
            let state = AppState::new(db, ServerConfig { no_cache });
            let app = create_router(state);

            info!("Starting HTTP server on {}", addr);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
        }
        Command::Stats => {
            let stats = db.stats()?;
            println!("Zettels:    {}", stats.zettels);
            println!("  fleet:     {}", stats.fleet);
            println!("  permanent: {}", stats.permanent);
            println!("Links:      {}", stats.links);
            println!("Workspaces: {}", stats.workspaces);
        }
    }

    Ok(())
}

fn open_database(path: &Path) -> Result<Database> {
    // Create directory if it doesn't exist
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let db = Database::new(path)?;
    info!("Database initialized at: {}", path.display());
    Ok(db)
}
