//! Demo client: runs the engine against a live server and dumps what it
//! materializes.
//!
//! ```text
//! demo-client --base-url http://localhost:3001 --artist <id>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use chorus_client::{
    CatalogTransport, ClientConfig, ClientEngine, HttpTransport, ItemStatus, KeyValueStore,
    MemoryKvStore,
};
use chorus_core::clock::SystemClock;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "demo-client", about = "Chorus catalog client demo")]
struct CliArgs {
    /// Server base URL.
    #[arg(long, env = "CHORUS_BASE_URL", default_value = "http://localhost:3001")]
    base_url: String,

    /// Path to the durable database file. Omit for in-memory state.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Artist ID to subscribe to after the initial sync.
    #[arg(long)]
    artist: Option<String>,
}

fn open_store(db_path: Option<&PathBuf>) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match db_path {
        #[cfg(feature = "redb")]
        Some(path) => {
            let store = chorus_client::RedbKvStore::open(path)
                .with_context(|| format!("opening database at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redb"))]
        Some(_) => anyhow::bail!("built without the redb feature; omit --db-path"),
        None => Ok(Arc::new(MemoryKvStore::new())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let kv = open_store(args.db_path.as_ref())?;
    let transport: Arc<dyn CatalogTransport> = Arc::new(HttpTransport::new(args.base_url.clone()));

    let config = ClientConfig {
        base_url: args.base_url,
        ..ClientConfig::default()
    };
    let engine = ClientEngine::start(config, kv, transport, Arc::new(SystemClock))
        .context("starting client engine")?;

    info!("running initial sync");
    engine.skeleton_sync().sync().await;
    engine.user_sync().initialize().await;
    info!(
        skeleton_version = engine.skeleton().version(),
        user_cursor = engine.user_data().cursor(),
        playlists = engine.user_data().playlists().len(),
        "sync complete"
    );

    if let Some(artist_id) = args.artist {
        let mut watch = engine.provider().artist(&artist_id);
        while let Some(status) = watch.next().await {
            match status {
                ItemStatus::Loading { id } => info!(id = %id, "loading"),
                ItemStatus::Loaded { id, entity } => {
                    info!(id = %id, entity = ?entity, "loaded");
                    break;
                }
                ItemStatus::Error { id, reason } => {
                    info!(id = %id, reason = %reason, "unavailable");
                    break;
                }
            }
        }
    }

    info!("press ctrl-c to exit");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    engine.shutdown().await;
    Ok(())
}
