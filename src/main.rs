use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use storefront_orchestrator as app;
use storefront_orchestrator::services::shipments::{HttpShipmentCollaborator, ShipmentDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = app::events::EventSender::new(event_tx);

    // Shipment packaging runs only when a carrier endpoint is configured
    let dispatcher = match HttpShipmentCollaborator::from_config(&cfg)? {
        Some(collaborator) => {
            info!("shipment packaging enabled");
            Some(Arc::new(
                ShipmentDispatcher::new(
                    db_arc.clone(),
                    Arc::new(collaborator),
                    cfg.shipment_timeout(),
                    cfg.shipment_max_attempts,
                )
                .with_event_sender(event_sender.clone()),
            ))
        }
        None => {
            warn!("shipment_api_url not set; shipment jobs will queue until a carrier is configured");
            None
        }
    };

    tokio::spawn(app::events::process_events(event_rx, dispatcher.clone()));

    if let Some(dispatcher) = dispatcher {
        app::events::outbox::start_worker(
            db_arc.clone(),
            dispatcher,
            cfg.outbox_poll_interval(),
        );
    }

    let app_state = app::AppState::new(db_arc, cfg.clone(), event_sender);
    let router = app::build_router(app_state);

    // Bind and serve
    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address '{}'", cfg.host))?;
    let addr = SocketAddr::from((host, cfg.port));
    info!("storefront-orchestrator listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
