mod push;

use crate::push::{PushBridge, PushMessage};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use server_core::config::ServerConfig;
use server_core::server::ServerController;
use std::collections::HashSet;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared handles of the push surface.
struct AppState {
    controller: Arc<ServerController>,
    push: PushBridge,
}

#[tokio::main]
/// Activates error tracing, loads the server configuration, starts the
/// controller, then serves the push WebSocket and a plain status page until
/// Ctrl-C asks for the teardown.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,server_core=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ServerConfig.json".to_owned());
    let config = match load_config(&config_path).await {
        Ok(config) => config,
        Err(message) => {
            tracing::error!(message, "Initial config load error.");
            panic!("Initial config load error: {}", message);
        }
    };

    let controller = match ServerController::new(config) {
        Ok(controller) => Arc::new(controller),
        Err(err) => {
            tracing::error!(%err, "Could not build the server controller.");
            panic!("Could not build the server controller: {}", err);
        }
    };
    if let Err(err) = controller.start().await {
        tracing::error!(%err, "Server controller failed to start.");
        panic!("Server controller failed to start: {}", err);
    }

    let push = PushBridge::new(&controller.plugin_context("push-bridge"));
    let app_state = Arc::new(AppState {
        controller: controller.clone(),
        push,
    });

    let app = Router::new()
        .route("/status", get(status_handler))
        .route("/ws", get(websocket_handler))
        .with_state(app_state);

    let listen = std::env::var("PUSH_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .unwrap_or_else(|err| panic!("Cannot bind {}: {}", listen, err));
    tracing::info!(listen = listen.as_str(), "Push surface listening.");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            if let Err(err) = result {
                tracing::error!(%err, "Push surface failed.");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested.");
        }
    }

    controller.stop().await;
}

/// Reads and parses the configuration file.
async fn load_config(path: &str) -> Result<ServerConfig, String> {
    let json_content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", path, e))?;
    serde_json::from_str(&json_content).map_err(|e| format!("Failed to parse {}: {}", path, e))
}

/// A plain text snapshot for a quick look without a dashboard.
async fn status_handler(State(state): State<Arc<AppState>>) -> String {
    let controller = &state.controller;
    let info = controller.server_info();
    let stats = controller.rule_stats();
    format!(
        "State: {:?}\nServer: {}\nPlayers: {:03} Squads: {:03}\nTick rate: {}\nLayer: {}\nLog lines: {} matched / {} unmatched / {} dropped\n",
        controller.state(),
        info.name.as_deref().unwrap_or("unknown"),
        controller.players().count(),
        controller.squads().count(),
        info.tick_rate
            .map(|rate| format!("{rate:.1}"))
            .unwrap_or_else(|| "-".to_owned()),
        controller
            .layers()
            .current()
            .map(|layer| layer.name)
            .unwrap_or_else(|| "-".to_owned()),
        stats.lines_matched,
        stats.lines_unmatched,
        stats.lines_dropped,
    )
}

#[derive(Deserialize)]
struct WsQuery {
    /// Comma separated topic filter; absent means everything.
    topics: Option<String>,
}

/// This function gets immediately called and upgrades the web response to a
/// web socket that streams the filtered event feed.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let topics: Option<HashSet<String>> = query.topics.map(|raw| {
        raw.split(',')
            .map(|topic| topic.trim().to_owned())
            .filter(|topic| !topic.is_empty())
            .collect()
    });
    ws.on_upgrade(move |socket| websocket(socket, state, topics))
}

/// Forwards bridge messages matching the client's topic filter. An error on
/// this socket only ends this client; a lagging client skips what it missed.
async fn websocket(socket: WebSocket, state: Arc<AppState>, topics: Option<HashSet<String>>) {
    // By splitting, we can send and receive at the same time.
    let (sender, receiver) = socket.split();
    let feed = state.push.subscribe();
    tokio::select! {
        _ = forward_feed(sender, feed, topics) => {}
        _ = drain_client(receiver) => {}
    }
}

/// Pushes the filtered feed out to one client until the socket fails.
async fn forward_feed(
    mut sender: SplitSink<WebSocket, Message>,
    mut feed: tokio::sync::broadcast::Receiver<PushMessage>,
    topics: Option<HashSet<String>>,
) {
    loop {
        match feed.recv().await {
            Ok(PushMessage { topic, json }) => {
                let wanted = topics
                    .as_ref()
                    .is_none_or(|filter| filter.contains(topic));
                if !wanted {
                    continue;
                }
                if sender
                    .send(Message::Text(json.as_str().to_owned().into()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped_messages = skipped, "Push client lagging.");
            }
            Err(RecvError::Closed) => {
                return;
            }
        }
    }
}

/// The receive side only matters for noticing the disconnect.
async fn drain_client(mut receiver: SplitStream<WebSocket>) {
    while let Some(message) = receiver.next().await {
        // We do not care about client chatter, only disconnects.
        if message.is_err() {
            return;
        }
    }
}
