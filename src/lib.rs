pub(crate) mod api;
pub(crate) mod cli;
pub(crate) mod core;
pub mod domain;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use services::aggregation::aggregate;
pub use services::reconciliation::reconcile;
pub use services::session_selection::select_authoritative_session;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::{CachedStore, GradingStore, PortalStore};
use crate::services::statistics::{build_performance_report, CrawlOptions};

async fn connect_redis(settings: &Settings) -> RedisHandle {
    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without cache");
    } else {
        tracing::info!("Redis connected successfully");
    }
    redis
}

fn build_cached_store(
    portal: PortalStore,
    settings: &Settings,
    redis: &RedisHandle,
) -> Arc<dyn GradingStore> {
    Arc::new(CachedStore::new(portal, redis.clone(), settings.grading().cache_ttl_seconds))
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let redis = connect_redis(&settings).await;
    let portal = PortalStore::from_settings(&settings)?;
    let crawl_store: Arc<dyn GradingStore> = Arc::new(portal.clone());
    let store = build_cached_store(portal, &settings, &redis);
    let state = AppState::new(settings, store, crawl_store, redis.clone());

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        addr = %state.settings().server_addr(),
        portal = %state.settings().portal().base_url,
        environment = %state.settings().runtime().environment.as_str(),
        "Gradeboard API listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(core::shutdown::drain_on_signal(state.clone()))
        .await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

/// Crawls the portal once for the scope given on the command line and prints the
/// performance report as JSON on stdout.
pub async fn run_report_cli() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = cli::parse_args(std::env::args().skip(1))?;
    let settings = Settings::load()?;
    telemetry::init_cli_tracing(&settings)?;

    // The crawl reads the portal directly; cached listings could be stale.
    let store = PortalStore::from_settings(&settings)?;

    let defaults = settings.statistics();
    let options = CrawlOptions {
        concurrency: args.concurrency.unwrap_or(defaults.concurrency),
        top_n: args.top_n.unwrap_or(defaults.top_n),
    };
    let report = build_performance_report(&store, &args.scope, options).await?;
    let output = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{output}");

    Ok(())
}
