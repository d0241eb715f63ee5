mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use huddle_api::ApiState;
use huddle_db::BlobStore;
use huddle_gateway::connection;
use huddle_gateway::coordinator::{ChatConfig, Coordinator};
use huddle_gateway::dispatcher::Dispatcher;
use huddle_gateway::retention::Sweeper;

use crate::config::Config;

/// Panics whose message contains one of these are logged and survived.
const BENIGN_PANICS: &[&str] = &["broken pipe", "connection reset"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "huddle=debug,huddle_gateway=debug,huddle_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    install_panic_hook();

    let config = Config::from_env()?;

    // Storage
    let store = huddle_db::open_store(
        config.store,
        &config.db_path,
        &config.log_path,
        config.log_max_records,
    )?;
    info!("Message store: {}", store.backend());
    let blobs = Arc::new(BlobStore::new(config.uploads_dir.clone()).await?);

    // Chat core
    let chat_config = ChatConfig {
        max_text_len: config.max_text_len,
        rate_window: config.rate_window,
        rate_max: config.rate_max,
        ..Default::default()
    };
    let coordinator = Coordinator::new(Dispatcher::new(), store, chat_config);

    let sweeper = Sweeper::new(coordinator.clone(), blobs.clone(), config.message_ttl);
    tokio::spawn(sweeper.run(config.sweep_interval));
    info!(
        "Retention: {}s TTL, sweeping every {}s",
        config.message_ttl.as_secs(),
        config.sweep_interval.as_secs()
    );

    let api_state = ApiState::new(blobs, config.max_upload_bytes, config.fetch_timeout)?;

    // Routes
    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(coordinator);

    let mut app = Router::new()
        .merge(ws_route)
        .merge(huddle_api::router(api_state));

    if let Some(dir) = &config.public_dir {
        info!("Serving front-end from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    let app = app
        .layer(cors_layer(config.allowed_origin.as_deref())?)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer-when-downgrade"),
        ))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Huddle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(State(coordinator): State<Coordinator>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, coordinator))
}

fn cors_layer(allowed_origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let origin = match allowed_origin {
        Some(origin) => AllowOrigin::exact(HeaderValue::from_str(origin)?),
        None => AllowOrigin::any(),
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(false))
}

/// Log every panic. Anything not on the benign list exits with status 1.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        let lower = message.to_ascii_lowercase();
        if BENIGN_PANICS.iter().any(|pattern| lower.contains(pattern)) {
            warn!("Ignoring benign panic at {}: {}", location, message);
            return;
        }

        error!("Fatal panic at {}: {}", location, message);
        std::process::exit(1);
    }));
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
