use std::path::PathBuf;

use clap::{self, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use caddie_backend::db::{config, global, DatabaseConfig, Platform};

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage backend (mobile, browser, server), detected if not set
    #[arg(short, long, env = config::ENV_PLATFORM)]
    platform: Option<Platform>,

    /// SQLite file for the mobile backend
    #[arg(long, env = config::ENV_DB_PATH)]
    db_path: Option<PathBuf>,

    /// PostgreSQL url for the server backend
    #[arg(long, env = config::ENV_DATABASE_URL)]
    database_url: Option<String>,

    /// Directory holding browser snapshots
    #[arg(long, env = config::ENV_SNAPSHOT_DIR)]
    snapshot_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open (creating if needed) the database and report the backend
    Init,
    /// List the tables of the database
    Tables,
    /// Write a browser snapshot now
    Flush,
}

impl Args {
    fn database_config(&self) -> anyhow::Result<DatabaseConfig> {
        let mut config = DatabaseConfig::from_env()?;
        if self.platform.is_some() {
            config.platform = self.platform;
        }
        if let Some(path) = &self.db_path {
            config.native_path = path.clone();
        }
        if self.database_url.is_some() {
            config.server_url = self.database_url.clone();
        }
        if self.snapshot_dir.is_some() {
            config.browser.snapshot_dir = self.snapshot_dir.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let filter = args
        .log_level
        .as_deref()
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    global::configure(args.database_config()?).await;
    let db = global::init_database().await?;
    tracing::info!(platform = %db.platform(), dialect = %db.dialect(), "database opened");

    match args.command {
        Command::Init => {
            println!("{} database ready ({})", db.platform(), db.dialect());
        }
        Command::Tables => {
            for name in db.table_names().await? {
                println!("{}", name);
            }
        }
        Command::Flush => {
            if db.platform().persists_snapshots() {
                global::save_database().await?;
                let size = global::load_database().await?.map_or(0, |image| image.len());
                println!("snapshot saved ({} bytes)", size);
            } else {
                println!("{} database needs no snapshot", db.platform());
            }
        }
    }

    global::close_database().await?;
    Ok(())
}
