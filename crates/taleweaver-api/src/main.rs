//! Taleweaver API server entry point.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use taleweaver_api::config::EngineConfig;
use taleweaver_api::generation::{EchoGenerationService, HttpGenerationService};
use taleweaver_api::state::AppState;
use taleweaver_core::clock::{Clock, SystemClock};
use taleweaver_core::generation::GenerationService;
use taleweaver_core::rng::SystemRng;
use taleweaver_orchestration::application::orchestrator::TurnOrchestrator;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let telemetry = taleweaver_api::telemetry::init()?;

    info!("Starting Taleweaver API server");

    let config = EngineConfig::load()?;

    let generation: Arc<dyn GenerationService> = match &config.generation.url {
        Some(url) => {
            info!(%url, "using HTTP generation backend");
            Arc::new(HttpGenerationService::new(url.clone())?)
        }
        None => {
            warn!("GENERATION_URL not set, agents will answer with canned replies");
            Arc::new(EchoGenerationService)
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app_state = AppState::assemble(
        &config,
        generation,
        Arc::clone(&clock),
        Box::new(SystemRng::new()),
    );

    tokio::spawn(sweep_expired_sessions(
        Arc::clone(&app_state.orchestrator),
        clock,
        config.sweep_interval(),
    ));

    let app = taleweaver_api::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| format!("invalid HOST:PORT combination: {e}"))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    telemetry.shutdown();

    Ok(())
}

async fn sweep_expired_sessions(
    orchestrator: Arc<TurnOrchestrator>,
    clock: Arc<dyn Clock>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = orchestrator.expire_sessions(clock.now()).await {
            warn!(error = %e, "session sweep failed");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
