mod worker;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use octopoes_config::{Settings, SettingsLoad, SettingsSource, load_settings};
use octopoes_core::{
    database::{DocumentStore, infrastructure::XtdbHttpClient},
    events::{EventManager, RedisBroker},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::worker::{EventWorker, factory_for};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "octopoes-worker")]
#[command(about = "Consumes Octopoes change events and runs maintenance jobs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process event batches from the broker queue until interrupted
    Worker,
    /// Recompute inherited scan levels for one client and exit
    RecalculateScanProfiles(ClientArgs),
    /// Re-attach and rerun every enabled bit for one client and exit
    RecalculateBits(ClientArgs),
    /// Create the XTDB node for one client
    CreateNode(ClientArgs),
    /// Delete the XTDB node of one client and everything stored on it
    DeleteNode(ClientArgs),
    /// Print the store status of one client's node
    Status(ClientArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct ClientArgs {
    /// XTDB node to work on (defaults to the configured client)
    #[arg(long, env = "XTDB_CLIENT")]
    client: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_runtime_settings()?;

    match cli.command.unwrap_or(Command::Worker) {
        Command::Worker => run_worker(settings).await,
        Command::RecalculateScanProfiles(args) => {
            recalculate_scan_profiles(settings, args).await
        }
        Command::RecalculateBits(args) => recalculate_bits(settings, args).await,
        Command::CreateNode(args) => {
            let store = node_client(&settings, args)?;
            store.create_node().await.context("failed to create node")
        }
        Command::DeleteNode(args) => {
            let store = node_client(&settings, args)?;
            store.delete_node().await.context("failed to delete node")
        }
        Command::Status(args) => {
            let store = node_client(&settings, args)?;
            let status = store.status().await.context("failed to read node status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

fn load_runtime_settings() -> anyhow::Result<Settings> {
    let SettingsLoad {
        settings,
        source,
        env_file_loaded,
    } = load_settings().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_file_loaded {
        info!("loaded .env file");
    }
    match &source {
        SettingsSource::Default => info!("using default settings"),
        SettingsSource::EnvPath(path) => {
            info!(path = %path.display(), "settings loaded from env path")
        }
        SettingsSource::EnvInline => {
            info!("settings loaded from inline environment json")
        }
        SettingsSource::File(path) => {
            info!(path = %path.display(), "settings loaded from file")
        }
    }
    info!(
        xtdb.url = %settings.xtdb.url,
        broker.queue = %settings.broker.event_queue,
        broker.batch_size = settings.broker.batch_size,
        broker.flush_interval_ms = settings.broker.flush_interval_ms,
        "engine configuration in effect"
    );
    Ok(settings)
}

fn node_client(settings: &Settings, args: ClientArgs) -> anyhow::Result<XtdbHttpClient> {
    let client = args.client.unwrap_or_else(|| settings.xtdb.client.clone());
    XtdbHttpClient::new(&settings.xtdb, Some(&client))
        .with_context(|| format!("failed to create store client for {client}"))
}

async fn connect_publisher(settings: &Settings) -> anyhow::Result<Arc<EventManager>> {
    let broker = RedisBroker::connect(&settings.broker.url)
        .await
        .context("failed to connect to the message broker")?;
    Ok(EventManager::spawn(Arc::new(broker), &settings.broker))
}

async fn run_worker(settings: Settings) -> anyhow::Result<()> {
    let consumer = RedisBroker::connect(&settings.broker.url)
        .await
        .context("failed to connect to the message broker")?;
    let manager = connect_publisher(&settings).await?;

    let mut worker = EventWorker::new(settings, manager.clone());
    let result = worker.run(&consumer).await;

    manager
        .force_flush()
        .await
        .context("failed to flush pending events on shutdown")?;
    result
}

async fn recalculate_scan_profiles(
    settings: Settings,
    args: ClientArgs,
) -> anyhow::Result<()> {
    let manager = connect_publisher(&settings).await?;
    let client = args.client.unwrap_or_else(|| settings.xtdb.client.clone());
    let service = factory_for(&settings, &client, manager.clone())?.service();

    let summary = service
        .recalculate_scan_profiles(Utc::now())
        .await
        .context("scan profile recalculation failed")?;
    service.commit().await.context("failed to commit scan profiles")?;
    manager.force_flush().await.context("failed to flush events")?;

    info!(
        client = %client,
        assigned = summary.assigned,
        writes = summary.writes(),
        "scan profiles recalculated"
    );
    Ok(())
}

async fn recalculate_bits(settings: Settings, args: ClientArgs) -> anyhow::Result<()> {
    let manager = connect_publisher(&settings).await?;
    let client = args.client.unwrap_or_else(|| settings.xtdb.client.clone());
    let service = factory_for(&settings, &client, manager.clone())?.service();

    let executions = service
        .recalculate_bits(Utc::now())
        .await
        .context("bit recalculation failed")?;
    service.commit().await.context("failed to commit bit results")?;
    manager.force_flush().await.context("failed to flush events")?;

    info!(client = %client, executions, "bits recalculated");
    Ok(())
}
