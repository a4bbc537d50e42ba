use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderValue, header},
        response::{IntoResponse, Json},
        routing::get,
    },
    lrcom_config::LrcomConfig,
    lrcom_protocol::PROTOCOL_VERSION,
    serde_json::json,
    tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer},
    tracing::info,
};

#[cfg(feature = "push-notifications")]
use {
    crate::push::{ChannelSink, PushJob, spawn_push_worker},
    tokio::sync::mpsc,
};

use crate::{
    capacity, push::PushSink, state::GatewayState, timers::spawn_timers, turn,
    ws::handle_connection,
};

/// Largest inbound WebSocket message accepted.
const MAX_MESSAGE_BYTES: usize = 256 * 1024;

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the hub router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/healthz", get(health_handler))
        .route("/turn", get(turn_handler))
        .route("/api/config", get(config_handler))
        .route("/api/push/public-key", get(push_key_handler))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(feature = "push-notifications")]
type PushWiring = (
    Option<Arc<dyn PushSink>>,
    Option<mpsc::UnboundedReceiver<PushJob>>,
);

/// Wire up push delivery when VAPID keys are configured.
#[cfg(feature = "push-notifications")]
fn start_push(config: &LrcomConfig) -> PushWiring {
    if !config.push.is_enabled() {
        return (None, None);
    }
    let (sink, rx) = ChannelSink::new();
    let sink: Arc<dyn PushSink> = sink;
    (Some(sink), Some(rx))
}

/// Start the hub HTTP + WebSocket server.
pub async fn start_gateway(config: LrcomConfig) -> anyhow::Result<()> {
    #[cfg(feature = "push-notifications")]
    let (push, push_rx) = start_push(&config);
    #[cfg(not(feature = "push-notifications"))]
    let push: Option<Arc<dyn PushSink>> = None;

    let state = GatewayState::new(config, push);

    #[cfg(feature = "push-notifications")]
    let _push_worker = match push_rx {
        Some(rx) => spawn_push_worker(Arc::clone(&state), rx, &state.config.push)?,
        None => None,
    };

    let app = build_gateway_app(Arc::clone(&state));

    let server = &state.config.server;
    let addr: SocketAddr = format!("{}:{}", server.bind, server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let turn_line = match capacity::turn_host_label(&state.config.turn.urls) {
        Some(host) if turn::is_turn_configured(&state.config.turn) => format!("turn: {host}"),
        _ => "turn: not configured (STUN only)".to_string(),
    };
    let lines = [
        format!("{} hub v{}", server.app_name, state.version),
        format!("protocol v{PROTOCOL_VERSION}, listening on {addr}"),
        turn_line,
        format!(
            "web push: {}",
            if state.push_enabled { "enabled" } else { "disabled" }
        ),
    ];
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    spawn_timers(&state);

    // Run the server with ConnectInfo for remote IP extraction.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let hub = state.hub.lock().await;
    Json(json!({
        "status": "ok",
        "version": state.version,
        "protocol": PROTOCOL_VERSION,
        "connections": hub.connection_count(),
        "activeCalls": hub.active_calls(),
    }))
}

async fn turn_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(turn::ice_config(&state.config.turn, turn::unix_now()))
}

async fn config_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let voice = state.hub.lock().await.voice_stats();
    Json(json!({
        "appName": state.config.server.app_name,
        "voice": voice,
    }))
}

async fn push_key_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let public_key = state
        .push_enabled
        .then(|| state.config.push.vapid_public_key.clone())
        .flatten();
    Json(json!({
        "enabled": state.push_enabled,
        "publicKey": public_key,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state, addr))
}
