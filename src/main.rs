use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use meallink_api::{
    app, config, db,
    events,
    gateway::HttpGateway,
    services::{orders::OrderService, payments::PaymentService},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&config);
    info!(
        environment = %config.environment,
        "starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let pool = db::establish_connection(&config)
        .await
        .context("failed to connect to the database")?;
    if config.auto_migrate {
        db::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let (event_sender, event_rx) = events::event_channel(1024);
    tokio::spawn(events::process_events(event_rx));

    let gateway = Arc::new(HttpGateway::new(&config.gateway).context("failed to build gateway client")?);
    let config = Arc::new(config);
    let orders = OrderService::new(pool.clone(), event_sender.clone(), config.payments.tax_rate);
    let payments = PaymentService::new(pool.clone(), gateway, event_sender.clone(), &config);

    let state = AppState {
        db: pool,
        config: config.clone(),
        orders,
        payments,
        events: event_sender,
    };

    let cors = if config.cors_allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
    };

    let router = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
