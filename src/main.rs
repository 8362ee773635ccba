// topicd - topic catalog service with a cache-coherent read path
//
// Architecture:
// - RPC surface (axum): unary JSON endpoints for create/update/delete/
//   lookup/list
// - Coherence engine: read-through cache with an existence filter, per-key
//   singleflight, and delayed double-invalidation on writes
// - Store adapter (SQLite): the authoritative record, soft deletes via a
//   tombstoning unique column
// - Cache adapter (clustered key-value store): values, distributed locks,
//   existence bitmap
// - Reconcilers (cron): status convergence and search-index refresh, one
//   runner per fleet per tick

mod cache;
mod cli;
mod config;
mod engine;
mod error;
mod events;
mod model;
mod reconciler;
mod sched;
mod server;
mod stats;
mod store;

use crate::cache::{RedisCache, TopicCache, JOB_UPDATE_STATISTIC, JOB_UPDATE_STATUS};
use crate::config::Config;
use crate::engine::Engine;
use crate::events::{EventSink, KafkaEvents};
use crate::reconciler::Reconciler;
use crate::sched::Scheduler;
use crate::stats::{HttpStatsClient, StatsProvider};
use crate::store::Store;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if cli.debug {
        config.debug = true;
    }

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Store::open(&config.store_path, config.store_pool_size)?;

    if matches!(cli.command, Some(cli::Commands::Migrate)) {
        store.migrate().await?;
        tracing::info!("store schema is up to date");
        return Ok(());
    }

    let cache: Arc<dyn TopicCache> = Arc::new(
        RedisCache::connect(
            &config.cache_nodes,
            &config.cache_password,
            &config.cache_prefix,
            config.lock_ttl_secs,
        )
        .await?,
    );
    let stats: Arc<dyn StatsProvider> = Arc::new(HttpStatsClient::new(&config.analytics_url)?);
    let events: Arc<dyn EventSink> =
        Arc::new(KafkaEvents::new(&config.kafka_brokers, &config.event_topic)?);

    let engine = Arc::new(Engine::new(
        store.clone(),
        cache.clone(),
        stats,
        events.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        cache,
        events,
        engine.clone(),
    ));

    spawn_pool_stats_ticker(store);

    // cover rows that predate the existence filter, then converge statuses
    if let Err(err) = reconciler.warm_existence_filter().await {
        tracing::error!("existence filter warm-up: {err}");
    }
    if let Err(err) = reconciler.reconcile_status_full().await {
        tracing::error!("startup status sweep: {err}");
    }

    let mut scheduler = Scheduler::new();
    if config.enable_cron {
        let r = reconciler.clone();
        scheduler.spawn(JOB_UPDATE_STATUS, sched::STATUS_TICK, move || {
            let r = r.clone();
            async move {
                if let Err(err) = r.reconcile_status().await {
                    tracing::error!("status reconciler: {err}");
                }
            }
        })?;

        let r = reconciler.clone();
        scheduler.spawn(JOB_UPDATE_STATISTIC, sched::INDEX_REFRESH_TICK, move || {
            let r = r.clone();
            async move {
                if let Err(err) = r.refresh_search_index().await {
                    tracing::error!("search index refresh: {err}");
                }
            }
        })?;
    }

    let app_state = server::AppState {
        engine,
        follow_enabled: config.enable_follow,
    };
    server::serve(&config, app_state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    scheduler.shutdown();
    Ok(())
}

/// Pool utilization snapshot every five minutes, at debug level.
fn spawn_pool_stats_ticker(store: Store) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = store.pool_stats();
            tracing::debug!(
                "store pool: {} connections, {} idle",
                stats.connections,
                stats.idle
            );
        }
    });
}
