//! Blocking request/response channels from a calling scope to the gateway

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace};

use crate::server::protocol::{GitRequest, GitResponse, RequestEnvelope, ServerMessage};
use crate::server::OperationHandler;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    #[error("No response from gateway within {0:?}")]
    Timeout(Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// One blocking round trip to the gateway
pub trait GatewayChannel: Send + Sync {
    fn call(&self, request: &GitRequest, timeout: Duration) -> Result<GitResponse, ChannelError>;
}

fn blocking_runtime() -> Result<Runtime, ChannelError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ChannelError::Protocol(format!("cannot start channel runtime: {}", e)))
}

/// Channel over the gateway's WebSocket endpoint, one connection per call.
///
/// Owns a private runtime, so `call` must not run on a tokio worker thread.
pub struct WebSocketChannel {
    url: String,
    connect_timeout: Duration,
    next_id: AtomicU64,
    runtime: Runtime,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, ChannelError> {
        Ok(Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            next_id: AtomicU64::new(1),
            runtime: blocking_runtime()?,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn round_trip(
        &self,
        request: &GitRequest,
        timeout: Duration,
    ) -> Result<GitResponse, ChannelError> {
        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| ChannelError::Unavailable(format!("connecting to {} timed out", self.url)))?
            .map_err(|e| ChannelError::Unavailable(format!("{}: {}", self.url, e)))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = RequestEnvelope {
            id: Some(id),
            body: request.clone().into(),
        };
        let bytes = rmp_serde::to_vec_named(&envelope)
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        ws.send(Message::Binary(bytes))
            .await
            .map_err(|e| ChannelError::Unavailable(e.to_string()))?;
        debug!(id, url = %self.url, operation = request.request.kind(), "request sent");

        let wait = async {
            while let Some(frame) = ws.next().await {
                let data = match frame {
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(ChannelError::Unavailable(e.to_string())),
                };
                let msg: ServerMessage = rmp_serde::from_slice(&data)
                    .map_err(|e| ChannelError::Protocol(format!("undecodable reply: {}", e)))?;
                match msg {
                    ServerMessage::GitResult {
                        id: Some(got),
                        response,
                    } if got == id => return Ok(response),
                    ServerMessage::Error { code, message } => {
                        return Err(ChannelError::Protocol(format!("{}: {}", code, message)))
                    }
                    other => trace!("skipping {:?}", other),
                }
            }
            Err(ChannelError::Unavailable(
                "connection closed before a response arrived".to_string(),
            ))
        };

        let result = tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ChannelError::Timeout(timeout))?;
        let _ = ws.close(None).await;
        result
    }
}

impl GatewayChannel for WebSocketChannel {
    fn call(&self, request: &GitRequest, timeout: Duration) -> Result<GitResponse, ChannelError> {
        self.runtime.block_on(self.round_trip(request, timeout))
    }
}

/// Channel straight into an in-process handler (gateway scope, embedding, tests)
pub struct LocalChannel {
    handler: Arc<OperationHandler>,
    runtime: Runtime,
}

impl LocalChannel {
    pub fn new(handler: Arc<OperationHandler>) -> Result<Self, ChannelError> {
        Ok(Self {
            handler,
            runtime: blocking_runtime()?,
        })
    }
}

impl GatewayChannel for LocalChannel {
    fn call(&self, request: &GitRequest, timeout: Duration) -> Result<GitResponse, ChannelError> {
        let handler = self.handler.clone();
        let request = request.clone();
        self.runtime
            .block_on(tokio::time::timeout(timeout, handler.handle(None, request)))
            .map_err(|_| ChannelError::Timeout(timeout))
    }
}
