mod bot;
mod config;
mod coordinator;
mod credentials;
mod descriptor;
mod error;
mod formatter;
mod history;
mod http;
mod manager;
mod metrics;
mod models;
mod queue;
mod shard;
mod store;
mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bot::Bot;
use config::Config;
use coordinator::InspectCoordinator;
use manager::WorkerManager;
use shard::{ShardMessage, WorkerShard};
use store::{InMemoryStore, PostgresStore, Store, maybe_connect_db};
use transport::SimulatedTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tokio::fs::create_dir_all(&config.session_path)
        .await
        .with_context(|| format!("creating session directory at {}", config.session_path))?;

    let blacklist = credentials::load_blacklist(&config.blacklist_path).await?;
    let credentials: Vec<_> = credentials::load_credentials(&config.credentials_path)
        .await?
        .into_iter()
        .filter(|cred| !blacklist.contains(&cred.username))
        .collect();
    if credentials.is_empty() {
        tracing::warn!("no bot credentials loaded; every inspect will fail with NoBotsReady");
    }

    let db = maybe_connect_db(config.database_url.as_deref()).await?;
    let store: Arc<dyn Store> = match db {
        Some(pool) => Arc::new(PostgresStore::new(pool)),
        None => Arc::new(InMemoryStore::new()),
    };

    // `WORKER_ENABLED=false` runs the whole fleet as a single shard — no
    // weighted dispatch across groups, just one pool of bots (§6). When true,
    // the fleet is split into `BOTS_PER_WORKER`-sized shards as usual.
    let shard_width = if config.worker_enabled {
        config.bots_per_worker.max(1)
    } else {
        credentials.len().max(1)
    };

    let reconnect_policy = config.reconnect_policy();
    let mut shard_senders = Vec::new();
    for (shard_id, chunk) in credentials.chunks(shard_width).enumerate() {
        let mut bots = HashMap::new();
        for cred in chunk {
            let mut bot = Bot::with_proxy(
                cred.username.clone(),
                cred.password.clone(),
                config.proxy_url.clone(),
                Box::new(SimulatedTransport::new()),
                reconnect_policy,
                config.inspect_cooldown,
            );
            if let Err(err) = bot.connect().await {
                tracing::warn!(shard = shard_id, bot = %cred.username, error = %err, "initial login failed");
            }
            bots.insert(cred.username.clone(), bot);
        }

        let (tx, rx) = mpsc::channel(256);
        let shard = WorkerShard::new(
            shard_id,
            bots,
            rx,
            config.health_check_interval,
            config.health_check_initial_delay,
        );
        tokio::spawn(shard.run());
        shard_senders.push(tx);
    }

    let shutdown_senders = shard_senders.clone();
    let manager = Arc::new(WorkerManager::new(shard_senders, config.max_retries));
    tracing::info!(shards = manager.shard_count(), "worker manager initialized");
    {
        let manager = manager.clone();
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            manager.run_stats_refresh(stats_interval).await;
        });
    }

    let store_for_health = store.clone();
    let coordinator = Arc::new(InspectCoordinator::with_queue_limits(
        manager.clone(),
        store,
        config.inspect_timeout,
        config.asset_cache_ttl,
        config.queue_capacity,
        config.queue_deadline,
    ));
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.run_dispatch_loop().await;
        });
    }
    {
        let coordinator = coordinator.clone();
        let sweep_period = std::time::Duration::from_secs(1);
        tokio::spawn(async move {
            coordinator.run_deadline_sweep(sweep_period).await;
        });
    }

    let state = http::AppState {
        coordinator,
        manager,
        queue_capacity: config.queue_capacity,
        allow_refresh: config.allow_refresh,
        store: store_for_health,
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown_senders))
        .await?;

    Ok(())
}

/// Waits for Ctrl+C, then tells every shard to tear its bots down before the
/// process exits (§9 open question 3: shutdown releases transport sessions
/// for every bot, including ones already `PermanentlyFailed`).
async fn wait_for_shutdown_signal(shard_senders: Vec<mpsc::Sender<ShardMessage>>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, notifying shards");
    for sender in &shard_senders {
        let _ = sender.send(ShardMessage::Shutdown).await;
    }
}
