//! Admin Gateway
//!
//! Serves the admin password reset action on top of the reconciliation engine.

use anyhow::Result;
use clap::Parser;
use credential_reconciler::admin::{router, AdminState};
use credential_reconciler::config::BackendArgs;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "admin-gateway", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ADMIN_LISTEN_ADDR", default_value = "0.0.0.0:8083")]
    listen: SocketAddr,

    #[command(flatten)]
    backend: BackendArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    info!("Starting admin gateway");

    let backends = args.backend.connect()?;
    let state = AdminState {
        engine: Arc::new(args.backend.engine(&backends)),
        roles: backends.roles.clone(),
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    info!("Admin gateway listening on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
