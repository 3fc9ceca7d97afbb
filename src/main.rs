use anyhow::Context;
use brightai_gateway::config::Args;
use brightai_gateway::routes::{Route, build_router, validate_route_table};
use brightai_gateway::state::AppState;
use brightai_gateway::{rate_limit, session, telemetry};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments (env vars fill in whatever flags are missing)
    let args = Args::parse();
    telemetry::init_tracing(&args.log_format).context("failed to install tracing subscriber")?;

    let config = args.into_config().context("invalid configuration")?;
    validate_route_table(&config).context("invalid route table")?;

    let port = config.port;
    let environment = config.environment;
    let sweep_every = config.rate_limits.sweep_interval();

    let state = AppState::from_config(config)
        .context("failed to build upstream clients")?
        .into_shared();

    // background sweepers for expired rate limit windows and idle sessions
    rate_limit::spawn_sweeper(state.rate_limiter.clone(), sweep_every);
    session::spawn_sweeper(state.sessions.clone(), session::SWEEP_INTERVAL);

    info!(
        environment = ?environment,
        gemini = state.gemini.is_some(),
        groq = state.groq.is_some(),
        "Providers configured"
    );
    for route in Route::ALL {
        info!(method = %route.method(), path = route.path(), "Route registered");
    }

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "BrightAI gateway listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
