use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use {tern_config::TernConfig, tern_rpc::BackendServices};

use crate::{api, state::GatewayState, ws};

/// Cap on the post-signal connection drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the gateway router (shared between production startup and tests).
///
/// `/` is the client WebSocket upgrade; `/api/*` is the internal RPC
/// surface and must only be reachable from the service network.
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/health", get(health_handler))
        .route("/api/online_status", post(api::get_users_online_status))
        .route("/api/kick", post(api::kick_user_offline))
        .route(
            "/api/multi_terminal_check",
            post(api::multi_terminal_login_check),
        )
        .route("/api/batch_push", post(api::batch_push))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the gateway and serve until SIGTERM / ctrl-c, then drain.
pub async fn start_gateway(config: TernConfig, services: BackendServices) -> anyhow::Result<()> {
    let state = GatewayState::new(config, services);
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", state.config.gateway.bind, state.config.gateway.port)
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("tern gateway v{} on {}", state.version, state.hostname),
        format!(
            "protocol v{}, listening on {}",
            tern_protocol::PROTOCOL_VERSION,
            addr
        ),
        format!(
            "policy {:?}, presence shards {}",
            state.config.multi_terminal.policy, state.config.presence.concurrency
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let (drained_tx, drained_rx) = tokio::sync::oneshot::channel::<()>();
    let drain_state = Arc::clone(&state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining connections");
        if tokio::time::timeout(DRAIN_TIMEOUT, drain_state.shutdown())
            .await
            .is_err()
        {
            info!("drain cap hit, closing anyway");
        }
        let _ = drained_tx.send(());
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = drained_rx.await;
    })
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sig) => sig,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            },
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "protocol": tern_protocol::PROTOCOL_VERSION,
        "connections": state.online_count(),
        "users": state.registry.user_count(),
    }))
}
