use axum::{extract::State, response::Json, routing::get, Router};
use clap::Parser;
use elector::{
    Callbacks, CancellationToken, ElectionState, Elector, ElectorConfig, RedisLeaseStore, Result,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Runs one replica of a singleton job, elected through a Redis lease.
#[derive(Parser, Debug)]
#[command(name = "lease-elector", version, about, long_about = None)]
struct Cli {
    /// Redis connection URL
    #[arg(long, env = "ELECTOR_REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// Coordination key shared by all replicas
    #[arg(long, env = "ELECTOR_KEY", default_value = "lease-elector:leader")]
    key: String,

    /// Lease ttl in milliseconds
    #[arg(long, env = "ELECTOR_TTL_MS", default_value_t = 9_000)]
    ttl_ms: u64,

    /// Renew interval in milliseconds (0 picks ttl / 3)
    #[arg(long, env = "ELECTOR_RENEW_MS", default_value_t = 0)]
    renew_ms: u64,

    /// Address of the status endpoint
    #[arg(long, env = "ELECTOR_BIND_ADDR", default_value = "0.0.0.0:7000")]
    bind: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectorStatus {
    pub identity: String,
    pub key: String,
    pub state: ElectionState,
    pub is_leader: bool,
}

async fn get_status(State(elector): State<Arc<Elector>>) -> Json<ElectorStatus> {
    Json(ElectorStatus {
        identity: elector.identity().to_string(),
        key: elector.key().to_string(),
        state: elector.state(),
        is_leader: elector.is_leader(),
    })
}

fn job_callbacks() -> Callbacks {
    Callbacks::new()
        .on_acquired(|scope: CancellationToken| async move {
            info!("became leader, starting job");
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    () = scope.cancelled() => break,
                    _ = ticker.tick() => info!("job heartbeat"),
                }
            }
            info!("job stopped");
        })
        .on_lost(|_scope: CancellationToken| async {
            info!("leadership lost, job cleanup done");
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("lease-elector starting, key={} bind={}", cli.key, cli.bind);

    let store = RedisLeaseStore::connect(&cli.redis_url).await?;
    let config = ElectorConfig::new(cli.key, Duration::from_millis(cli.ttl_ms))
        .with_renew_interval(Duration::from_millis(cli.renew_ms));
    let elector = Arc::new(Elector::new(config, Arc::new(store), job_callbacks())?);

    let shutdown = CancellationToken::new();
    elector.start(&shutdown)?;

    let app = Router::new()
        .route("/status", get(get_status))
        .with_state(elector.clone());

    let listener = TcpListener::bind(cli.bind)
        .await
        .map_err(|e| elector::Error::Other(anyhow::anyhow!("Failed to bind: {}", e)))?;
    info!("status endpoint listening on {}", cli.bind);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
    }
    info!("shutting down");

    let stopped = elector.stop(Duration::from_secs(5)).await;
    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => error!("status server error: {}", e),
        Err(e) => error!("status server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    stopped
}
