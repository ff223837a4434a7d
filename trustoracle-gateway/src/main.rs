//! Trust Oracle Gateway
//!
//! Backend gateway of the hardware-witness telemetry pipeline: devices
//! stream Ed25519-signed activity batches over WebSocket text frames;
//! verified submissions are staged durably and submitted to the chain
//! in scheduled per-device batches. Without chain configuration the
//! gateway runs local-only with every functional path intact.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use trustoracle_core::chain::HttpChainGateway;
use trustoracle_core::{ChainGateway, Store};

use trustoracle_gateway::api::{self, AppState};
use trustoracle_gateway::config::GatewayConfig;
use trustoracle_gateway::connections::ConnectionMap;
use trustoracle_gateway::session::SessionDeps;
use trustoracle_gateway::{scheduler, server};

#[derive(Parser)]
#[command(name = "trustoracle-gateway", about = "Trust Oracle telemetry gateway")]
struct Cli {
    /// Device WebSocket listen address override
    #[arg(short, long)]
    ws_listen: Option<String>,

    /// Management HTTP listen address override
    #[arg(short = 'l', long)]
    http_listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut cfg = GatewayConfig::from_env();
    if let Some(ws_listen) = cli.ws_listen {
        cfg.ws_addr = ws_listen;
    }
    if let Some(http_listen) = cli.http_listen {
        cfg.http_addr = http_listen;
    }
    if let Some(database) = cli.database {
        cfg.db_path = database;
    }
    let cfg = Arc::new(cfg);

    let store = Store::open(&cfg.db_path)?;

    let chain: Option<Arc<dyn ChainGateway>> = match &cfg.chain {
        Some(settings) => {
            tracing::info!(network = %settings.network, "chain mirroring enabled");
            Some(Arc::new(HttpChainGateway::new(settings)?) as Arc<dyn ChainGateway>)
        }
        None => {
            tracing::info!("running local-only, chain mirroring disabled");
            None
        }
    };

    if let Some(chain) = &chain {
        let _ = scheduler::spawn_batch_scheduler(
            store.clone(),
            Arc::clone(chain),
            cfg.chain_call_timeout,
        );
    }

    let connections = ConnectionMap::new();
    let deps = SessionDeps {
        store: store.clone(),
        chain: chain.clone(),
        connections: connections.clone(),
        config: Arc::clone(&cfg),
    };
    let state = AppState {
        store,
        chain,
        connections,
        config: Arc::clone(&cfg),
    };

    let ws_listener = tokio::net::TcpListener::bind(&cfg.ws_addr).await?;
    let http_listener = tokio::net::TcpListener::bind(&cfg.http_addr).await?;
    tracing::info!(ws = %cfg.ws_addr, http = %cfg.http_addr, "Trust Oracle gateway listening");

    let ws_app = server::ws_router(deps).into_make_service_with_connect_info::<SocketAddr>();
    let http_app = api::router(state);

    tokio::try_join!(
        async { axum::serve(ws_listener, ws_app).await },
        async { axum::serve(http_listener, http_app).await },
    )?;

    Ok(())
}
