//! WebSocket transport for a canvas client
//!
//! Owns the socket and pumps frames both ways over channels, so the
//! session itself stays synchronous and testable without a network.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ServerMessage};

/// Channel depth before backpressure on either direction.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
}

/// Handles for a live connection: send client frames in, receive server
/// frames out. Dropping the sender closes the socket; the receiver
/// yielding `None` means the server went away.
pub struct Transport {
    pub outgoing: mpsc::Sender<ClientMessage>,
    pub incoming: mpsc::Receiver<ServerMessage>,
}

/// Connect to a relay and spawn the pump tasks.
pub async fn connect(url: &str) -> Result<Transport, TransportError> {
    let (socket, _response) = connect_async(url).await?;
    info!(%url, "connected to relay");

    let (mut sink, mut stream) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
    let (incoming_tx, incoming_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "failed to serialize outgoing frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!("relay stopped accepting frames");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(server_msg) => {
                        if incoming_tx.send(server_msg).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "unparseable frame from relay");
                    }
                },
                Message::Close(_) => {
                    debug!("relay closed the connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            _ = (&mut send_task) => recv_task.abort(),
            _ = (&mut recv_task) => send_task.abort(),
        }
        info!("relay connection closed");
    });

    Ok(Transport {
        outgoing: outgoing_tx,
        incoming: incoming_rx,
    })
}
