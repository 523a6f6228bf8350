use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chain_reader::{connect_http, ChainRegistry};
use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use indexer::api::{ApiServer, AppState};
use indexer::batch::{BatchIndexer, BatchSettings};
use indexer::config::IndexerConfig;
use indexer::reconciler::{Reconciler, ReconcilerSettings};
use indexer::store::{JsonStore, Store};
use indexer::webhook::WebhookIngress;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration directory containing indexer.json (e.g., ./configs/dev)
    #[arg(long, env = "INDEXER_CONFIG_PATH", default_value = "./configs")]
    config_path: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (webhook, cron trigger, read model)
    Serve {
        /// Also run the batch indexer in-process every N seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Run one batch indexing pass and exit
    IndexOnce,
}

struct Services {
    config: IndexerConfig,
    store: Arc<dyn Store>,
    registry: Arc<ChainRegistry>,
    reconciler: Arc<Reconciler>,
}

async fn build_services(config: IndexerConfig) -> Result<Services> {
    let mut registry = ChainRegistry::new();
    for (&chain_id, chain) in &config.chains {
        let reader = connect_http(chain_id, &chain.rpc_url, Duration::from_secs(chain.rpc_timeout_secs))
            .with_context(|| format!("Failed to connect to chain {}", chain_id))?;
        tracing::info!(chain_id, rpc_url = %chain.rpc_url, "Chain reader ready");
        registry.insert(reader);
    }

    let store: Arc<dyn Store> = match &config.store.path {
        Some(path) => Arc::new(
            JsonStore::open(path)
                .await
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        ),
        None => {
            tracing::warn!("No store path configured, state will not survive a restart");
            Arc::new(JsonStore::in_memory())
        }
    };

    let chain = registry
        .get(config.default_chain_id)
        .context("Default chain has no reader")?;
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        chain,
        ReconcilerSettings {
            curve: config.curve,
            zero_balance_policy: config.members.zero_balance_policy,
            retry: config.retry,
            factory_address: config
                .chains
                .get(&config.default_chain_id)
                .and_then(|chain| chain.factory_address),
        },
    ));

    Ok(Services {
        config,
        store,
        registry: Arc::new(registry),
        reconciler,
    })
}

fn batch_settings(config: &IndexerConfig) -> BatchSettings {
    BatchSettings {
        group_limit: config.batch.group_limit,
        chunk_size: config.batch.chunk_size,
        group_time_budget: Duration::from_secs(config.batch.group_time_budget_secs),
    }
}

async fn run_interval(batch: Arc<BatchIndexer>, every: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                match batch.run_once().await {
                    Ok(report) => tracing::debug!(
                        current_block = report.current_block,
                        groups = report.results.len(),
                        "Scheduled batch run complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "Scheduled batch run failed"),
                }
            }
        }
    }
    tracing::info!("Batch interval stopped");
}

async fn serve(services: Services, interval_secs: Option<u64>) -> Result<()> {
    let Services {
        config,
        store,
        registry,
        reconciler,
    } = services;
    let cancel_token = CancellationToken::new();

    let batch = Arc::new(
        BatchIndexer::new(Arc::clone(&reconciler), batch_settings(&config)).with_cancel_token(cancel_token.clone()),
    );
    let webhook = Arc::new(WebhookIngress::new(
        Arc::clone(&reconciler),
        config.webhook.signing_key.clone(),
        config.environment,
    ));

    let app_state = AppState {
        store,
        registry,
        default_chain_id: config.default_chain_id,
        curve: config.curve,
        webhook,
        batch: Arc::clone(&batch),
        cron_secret: config.cron.secret.clone(),
        environment: config.environment,
    };

    let addr = config.bind_addr().context("Invalid API bind address")?;
    let server = ApiServer::new(app_state, addr).with_cancel_token(cancel_token.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            tracing::error!("API server failed: {:?}", e);
        }
    });

    let interval_handle = interval_secs.filter(|&s| s > 0).map(|secs| {
        tracing::info!(interval_secs = secs, "Recurring batch indexing enabled");
        tokio::spawn(run_interval(batch, Duration::from_secs(secs), cancel_token.clone()))
    });

    tracing::info!("Indexer running");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    cancel_token.cancel();
    if let Some(handle) = interval_handle {
        let _ = handle.await;
    }
    let _ = server_handle.await;
    tracing::info!("Indexer stopped");
    Ok(())
}

async fn index_once(services: Services) -> Result<()> {
    let batch = BatchIndexer::new(services.reconciler, batch_settings(&services.config));
    let report = batch.run_once().await.context("Batch indexing run failed")?;

    for result in &report.results {
        match &result.error {
            Some(error) => tracing::warn!(group_id = %result.group_id, events = result.events_processed, %error, "Group failed"),
            None => tracing::info!(group_id = %result.group_id, events = result.events_processed, "Group indexed"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&report.results)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting community token indexer");

    let config = IndexerConfig::load(&cli.config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", cli.config_path.display()))?;
    config.validate().context("Invalid configuration")?;
    tracing::info!(
        environment = ?config.environment,
        default_chain_id = config.default_chain_id,
        chains = config.chains.len(),
        "Configuration loaded"
    );

    let services = build_services(config).await?;

    match cli.command {
        Command::Serve { interval_secs } => serve(services, interval_secs).await,
        Command::IndexOnce => index_once(services).await,
    }
}
