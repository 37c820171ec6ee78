//! ura-ingest - Urban Review Analysis ingest service
//!
//! Reconciles heterogeneous records about urban infrastructure objects and
//! citizen reviews into a deduplicated SQLite dataset, runs the sentiment
//! pipeline over review text, and serves the export/stats interfaces the
//! map UI consumes.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ura-ingest", version, about = "URA ingest and reconciliation service")]
struct Args {
    /// Root data folder (overrides URA_ROOT_FOLDER and the config file)
    #[arg(long)]
    root_folder: Option<String>,

    /// HTTP port (overrides the http_port setting)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Starting ura-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder =
        ura_common::config::resolve_root_folder(args.root_folder.as_deref(), "URA_ROOT_FOLDER");
    std::fs::create_dir_all(&root_folder)?;

    let config = ura_common::config::load_toml_config().unwrap_or_default();

    let db_path = ura_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = ura_common::db::init_database(&db_path).await?;
    info!("Database connection established");

    let port = match args.port {
        Some(port) => port,
        None => ura_common::db::init::get_setting_or(&db_pool, "http_port", "5810")
            .await?
            .parse()
            .unwrap_or(5810),
    };

    let state = ura_ingest::AppState::build(db_pool, &config).await?;
    let shutdown = state.shutdown.clone();
    let app = ura_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested; cancelling in-flight batches");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
