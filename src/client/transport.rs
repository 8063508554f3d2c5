use crate::error::WalletError;
use crate::models::{ClientMessage, ServerMessage, SessionEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

/// One client's connection to the payment status channel. Callers own the
/// handle and pass it where it is needed.
#[async_trait]
pub trait RealtimeTransport: Send {
    async fn connect(&mut self) -> Result<(), WalletError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self);

    /// Joins a transaction's session. Fails with `SessionNotReady` when the
    /// connection is not up.
    async fn join(&mut self, transaction_id: Uuid) -> Result<(), WalletError>;

    async fn leave(&mut self, transaction_id: Uuid) -> Result<(), WalletError>;

    /// Next status event for any joined session. `None` once the connection
    /// is gone.
    async fn next_event(&mut self) -> Option<SessionEvent>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for `GET /ws/payments`.
pub struct WsTransport {
    url: String,
    stream: Option<WsStream>,
    pending: VecDeque<SessionEvent>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            pending: VecDeque::new(),
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), WalletError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| WalletError::SessionNotReady("transport not connected".to_string()))?;

        let text = serde_json::to_string(message)
            .map_err(|e| WalletError::Internal(format!("could not encode frame: {}", e)))?;

        if let Err(e) = stream.send(Message::Text(text)).await {
            self.stream = None;
            return Err(WalletError::SessionNotReady(format!("send failed: {}", e)));
        }
        Ok(())
    }

    /// Reads the next server frame, or `None` when the connection ended.
    async fn read_frame(&mut self) -> Option<ServerMessage> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(frame) => return Some(frame),
                    Err(e) => tracing::warn!(error = %e, "Ignoring unreadable server frame"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    tracing::debug!("Payment channel closed");
                    self.stream = None;
                    return None;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&mut self) -> Result<(), WalletError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| WalletError::SessionNotReady(format!("connect failed: {}", e)))?;

        tracing::info!(url = %self.url, "Payment channel connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        self.pending.clear();
    }

    async fn join(&mut self, transaction_id: Uuid) -> Result<(), WalletError> {
        self.send(&ClientMessage::Join { transaction_id }).await?;

        // Status frames for other sessions can arrive before the reply.
        loop {
            match self.read_frame().await {
                Some(ServerMessage::Joined {
                    transaction_id: joined,
                    ..
                }) if joined == transaction_id => return Ok(()),
                Some(ServerMessage::Status(event)) => self.pending.push_back(event),
                Some(ServerMessage::Error { code, message }) => {
                    return Err(match code.as_str() {
                        "SESSION_NOT_READY" => WalletError::SessionNotReady(message),
                        _ => WalletError::InvalidInput(message),
                    })
                }
                Some(_) => {}
                None => {
                    return Err(WalletError::SessionNotReady(
                        "connection closed while joining".to_string(),
                    ))
                }
            }
        }
    }

    async fn leave(&mut self, transaction_id: Uuid) -> Result<(), WalletError> {
        self.pending.retain(|event| event.transaction_id != transaction_id);
        self.send(&ClientMessage::Leave { transaction_id }).await
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            match self.read_frame().await? {
                ServerMessage::Status(event) => return Some(event),
                ServerMessage::Error { code, message } => {
                    tracing::warn!(code = %code, message = %message, "Server reported an error")
                }
                _ => {}
            }
        }
    }
}
