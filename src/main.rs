use anyhow::Context;
use model_gateway::api::{self, AppState};
use model_gateway::dispatcher::Dispatcher;
use model_gateway::observability;
use model_gateway::settings::Settings;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load().context("failed to load configuration")?;
    observability::init_tracing(&settings.server.log_level, settings.is_production());

    let dispatcher = Arc::new(Dispatcher::from_settings(&settings)?);
    for kind in [
        model_gateway::BackendKind::Text,
        model_gateway::BackendKind::Image,
    ] {
        let lane = dispatcher.lane(kind);
        info!(
            backend = %kind,
            model = lane.backend().model_name(),
            max_concurrency = lane.gate().capacity(),
            "Backend configured"
        );
    }

    let state = AppState::new(dispatcher.clone(), settings.api_key.as_str());
    let app = api::router(state, &settings.server);

    let addr = settings.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        environment = %settings.environment,
        "Model gateway v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await?;

    info!("Model gateway stopped");
    Ok(())
}

async fn shutdown_signal(dispatcher: Arc<Dispatcher>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, refusing queued requests");
    dispatcher.close();
}
