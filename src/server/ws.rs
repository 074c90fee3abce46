use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::GatewayConfig;
use crate::git::RepositoryManager;
use crate::server::context::AppContext;
use crate::server::protocol::{
    ClientMessage, GitRequest, RequestEnvelope, ServerMessage, PROTOCOL_VERSION,
};

/// Run the gateway described by `config` until the listener fails
pub async fn run_server(config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = AppContext::from_config(config)?;
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!(
        "Listening on ws://{}/ws (protocol v{})",
        addr, PROTOCOL_VERSION
    );

    serve(listener, ctx).await?;
    Ok(())
}

pub fn router(ctx: AppContext) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(ctx)
}

/// Serve on an already bound listener; also starts idle eviction if configured.
pub async fn serve(listener: TcpListener, ctx: AppContext) -> std::io::Result<()> {
    if let Some(idle) = ctx.idle_eviction {
        spawn_idle_evictor(ctx.handler.manager().clone(), idle);
    }
    axum::serve(listener, router(ctx)).await
}

/// Periodically drop repository handles nobody has used for `idle`
fn spawn_idle_evictor(manager: Arc<RepositoryManager>, idle: Duration) {
    let period = (idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = manager.evict_idle(idle);
            if evicted > 0 {
                info!(evicted, "evicted idle repositories");
            }
        }
    });
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Handle a WebSocket connection
async fn handle_socket(mut socket: WebSocket, ctx: AppContext) {
    let conn_id = uuid::Uuid::new_v4();
    info!(conn = %conn_id, "New WebSocket connection established");

    // Operation results come back from spawned tasks through this channel
    let (result_tx, mut result_rx) = mpsc::channel::<ServerMessage>(64);

    let hello = ServerMessage::Hello {
        version: PROTOCOL_VERSION,
        capabilities: ctx.capabilities.as_ref().clone(),
    };
    if let Err(e) = send_message(&mut socket, &hello).await {
        error!("Failed to send Hello message: {}", e);
        return;
    }

    loop {
        tokio::select! {
            biased;

            msg_result = socket.recv() => {
                match msg_result {
                    Some(Ok(Message::Binary(data))) => {
                        trace!("Received binary client message: {} bytes", data.len());
                        if let Err(e) = handle_client_message(&data, &mut socket, &ctx, &result_tx).await {
                            warn!("Error handling client message: {}", e);
                            if let Err(send_err) = send_message(&mut socket, &ServerMessage::Error {
                                code: "message_error".to_string(),
                                message: e,
                            }).await {
                                error!("Failed to send error message: {}", send_err);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(conn = %conn_id, "WebSocket connection closed by client");
                        break;
                    }
                    Some(Ok(Message::Text(_))) => {
                        warn!("Received text message, binary MessagePack expected");
                        if let Err(e) = send_message(&mut socket, &ServerMessage::Error {
                            code: "unsupported_frame".to_string(),
                            message: "binary MessagePack frames expected".to_string(),
                        }).await {
                            error!("Failed to send error message: {}", e);
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Handled automatically by axum
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket connection closed (recv returned None)");
                        break;
                    }
                }
            }

            Some(msg) = result_rx.recv() => {
                if let Err(e) = send_message(&mut socket, &msg).await {
                    error!("Failed to send git result: {}", e);
                    break;
                }
            }
        }
    }

    debug!(conn = %conn_id, "WebSocket connection handler finished");
}

/// Send a server message over WebSocket
pub async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), String> {
    // to_vec_named keeps field names (map encoding) instead of positional arrays
    let bytes = rmp_serde::to_vec_named(msg).map_err(|e| e.to_string())?;
    socket
        .send(Message::Binary(bytes))
        .await
        .map_err(|e| e.to_string())
}

/// Decode one client frame and dispatch it.
///
/// Git operations run in their own task so a slow push does not stall pings or
/// other requests on the same connection.
async fn handle_client_message(
    data: &[u8],
    socket: &mut WebSocket,
    ctx: &AppContext,
    result_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), String> {
    let envelope: RequestEnvelope = rmp_serde::from_slice(data).map_err(|e| {
        error!("Failed to parse client message: {}", e);
        format!("Parse error: {}", e)
    })?;
    let id = envelope.id;

    match envelope.body {
        ClientMessage::Ping => {
            send_message(socket, &ServerMessage::Pong).await?;
        }
        ClientMessage::GitOperation { path, request } => {
            let handler = ctx.handler.clone();
            let tx = result_tx.clone();
            tokio::spawn(async move {
                let response = handler.handle(id, GitRequest { path, request }).await;
                if tx
                    .send(ServerMessage::GitResult { id, response })
                    .await
                    .is_err()
                {
                    debug!("Connection gone before git result {:?} was sent", id);
                }
            });
        }
    }

    Ok(())
}
