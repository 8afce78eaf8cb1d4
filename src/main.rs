use anyhow::Result;
use smart_heating::{api, config::Config, controller, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    let app_state = controller::AppState::new(cfg.clone())?;
    let app = api::router(app_state.clone(), &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("binding to 0.0.0.0; the API has no authentication");
    }
    info!(
        %addr,
        prices = %cfg.prices.provider,
        weather = %cfg.weather.provider,
        "starting smart heating controller"
    );

    let cancel = app_state.cancel.clone();
    let tasks = controller::spawn_controller_tasks(&app_state, cancel.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            telemetry::shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "controller task ended abnormally");
        }
    }

    warn!("shutdown complete");
    Ok(())
}
