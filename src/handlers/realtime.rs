use crate::{
    handlers::AppState,
    models::{ClientMessage, ServerMessage},
    services::{ClientHandle, ConnectionState, JoinOutcome, NotificationHub},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub async fn payments_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    let buffer = state.session_buffer;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, buffer))
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|e| {
        tracing::error!(error = %e, "Could not encode server frame");
    })?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>, buffer: usize) {
    let (mut sender, mut receiver) = socket.split();
    let (client, mut events) = ClientHandle::new(buffer);
    client.mark_connected();
    let mut connection = client.subscribe_state();
    let mut joined: HashSet<Uuid> = HashSet::new();

    tracing::debug!(client_id = %client.id(), "Payment socket connected");

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if send_frame(&mut sender, &ServerMessage::Status(event)).await.is_err() {
                    break;
                }
            }

            Ok(()) = connection.changed() => {
                if *connection.borrow_and_update() == ConnectionState::Disconnected {
                    let frame = ServerMessage::Error {
                        code: "SLOW_CONSUMER".to_string(),
                        message: "Event queue overflowed; reconnect and rejoin".to_string(),
                    };
                    let _ = send_frame(&mut sender, &frame).await;
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_frame(&hub, &client, &mut joined, &text).await;
                        if send_frame(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    client.mark_disconnected();
    hub.leave_all(client.id(), joined).await;
    tracing::debug!(client_id = %client.id(), "Payment socket closed");
}

async fn handle_client_frame(
    hub: &NotificationHub,
    client: &ClientHandle,
    joined: &mut HashSet<Uuid>,
    text: &str,
) -> ServerMessage {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::Error {
                code: "INVALID_INPUT".to_string(),
                message: format!("Unreadable frame: {}", e),
            }
        }
    };

    match message {
        ClientMessage::Join { transaction_id } => match hub.join(transaction_id, client).await {
            Ok(outcome) => {
                joined.insert(transaction_id);
                ServerMessage::Joined {
                    transaction_id,
                    replayed: matches!(outcome, JoinOutcome::Joined { replayed: true }),
                }
            }
            Err(e) => ServerMessage::Error {
                code: e.error_code().to_string(),
                message: e.to_string(),
            },
        },
        ClientMessage::Leave { transaction_id } => {
            joined.remove(&transaction_id);
            hub.leave(transaction_id, client.id()).await;
            ServerMessage::Left { transaction_id }
        }
    }
}
