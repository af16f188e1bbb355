//! WebSocket handling for real-time canvas collaboration
//!
//! One task pair per connection: the receive task interprets client
//! frames against the authoritative store, the send task merges the
//! room-wide broadcast with direct replies (snapshots, rejections)
//! destined only for this client.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use mural_core::{CurrentUser, Operation, OperationKind};
use mural_sync::{ClientMessage, ServerMessage};

use crate::{Participant, ServerState};

/// Depth of the per-connection direct reply channel.
const DIRECT_CAPACITY: usize = 64;

/// Handle WebSocket upgrade requests.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one client connection until either side drops.
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    info!("new canvas connection");

    let (mut sender, mut receiver) = socket.split();
    let mut room_rx = state.tx.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMessage>(DIRECT_CAPACITY);

    // Full canvas immediately, before any broadcast frames.
    let welcome = ServerMessage::Welcome {
        snapshot: state.store.read().await.snapshot(),
    };
    match serde_json::to_string(&welcome) {
        Ok(frame) => {
            if sender.send(Message::Text(frame)).await.is_err() {
                warn!("client went away before the welcome frame");
                return;
            }
        }
        Err(error) => {
            warn!(%error, "failed to serialize welcome frame");
            return;
        }
    }

    let recv_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        // Set by the hello frame; operations before it are refused.
        let mut participant: Option<Participant> = None;

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => msg,
                        Err(error) => {
                            warn!(%error, "unparseable client frame");
                            continue;
                        }
                    };
                    handle_client_message(client_msg, &recv_state, &direct_tx, &mut participant)
                        .await;
                }
                Message::Close(_) => {
                    debug!("client disconnected");
                    break;
                }
                _ => {}
            }
        }
        participant
    });

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                room = room_rx.recv() => match room {
                    Ok(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client lagged behind the room broadcast");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(msg) => {
                        let Ok(frame) = serde_json::to_string(&msg) else {
                            continue;
                        };
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let departed = tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
            None
        }
        joined = (&mut recv_task) => {
            send_task.abort();
            joined.ok().flatten()
        }
    };

    // Drop the departed user's presence and tell the room.
    if let Some(participant) = departed {
        state.participants.remove(&participant.actor);
        state.presence.remove(&participant.actor);
        broadcast_message(
            &state,
            &ServerMessage::PeerLeft {
                actor: participant.actor,
            },
        );
    }
    info!("canvas connection closed");
}

/// Interpret one frame from the client.
async fn handle_client_message(
    msg: ClientMessage,
    state: &Arc<ServerState>,
    direct: &mpsc::Sender<ServerMessage>,
    participant: &mut Option<Participant>,
) {
    match msg {
        ClientMessage::Hello { actor, role } => {
            debug!(%actor, ?role, "participant joined");
            let joined = Participant { actor, role };
            state.participants.insert(actor, joined);
            *participant = Some(joined);
        }
        ClientMessage::Op { op } => {
            let Some(participant) = participant else {
                let _ = direct
                    .send(ServerMessage::Rejected {
                        message: "operation before hello".to_string(),
                    })
                    .await;
                return;
            };
            apply_and_relay(state, direct, *participant, op).await;
        }
        ClientMessage::Presence { state: presence } => {
            // Latest-wins per actor; stale frames never roll back.
            let fresh = match state.presence.get(&presence.actor) {
                Some(current) => current.seq < presence.seq,
                None => true,
            };
            if fresh {
                state.presence.insert(presence.actor, presence.clone());
                broadcast_message(state, &ServerMessage::Presence { state: presence });
            }
        }
        ClientMessage::RequestSnapshot => {
            let snapshot = state.store.read().await.snapshot();
            let _ = direct.send(ServerMessage::Snapshot { snapshot }).await;
        }
        ClientMessage::Ping => {
            let _ = direct.send(ServerMessage::Pong).await;
        }
    }
}

/// Re-apply a client operation against the authoritative store, then
/// either fan it out or send a rejection back to the sender alone.
/// Fan-out happens while the store lock is still held, so every client
/// observes operations in exactly the order they were applied.
async fn apply_and_relay(
    state: &Arc<ServerState>,
    direct: &mpsc::Sender<ServerMessage>,
    participant: Participant,
    op: Operation,
) {
    let user = CurrentUser::new(participant.actor, participant.role);
    let rejected = {
        let mut store = state.store.write().await;
        match store.apply(&op, Some(&user)) {
            Ok(effect) => {
                let relayed = match &op.kind {
                    // Every target was already gone or excluded by a
                    // racing lock; there is nothing for peers to mirror.
                    OperationKind::Delete { .. } if effect.is_noop() => {
                        debug!(stamp = ?op.stamp, "delete changed nothing, not relaying");
                        None
                    }
                    // A racing lock may have excluded batch members
                    // here; relay exactly the entities that were
                    // removed so replicas mirror this store.
                    OperationKind::Delete { .. } => Some(Operation::new(
                        op.stamp,
                        OperationKind::Delete {
                            entities: effect.changed.clone(),
                        },
                    )),
                    _ => {
                        if effect.is_noop() {
                            // Stale under last-writer-wins; relay anyway
                            // so every replica resolves the same race
                            // the same way.
                            debug!(stamp = ?op.stamp, "relaying already-resolved operation");
                        }
                        Some(op.clone())
                    }
                };
                if let Some(relayed) = relayed {
                    if let Err(error) =
                        state.persistence.persist_operation(&state.workspace, &relayed)
                    {
                        warn!(%error, "failed to append operation to the log");
                    }
                    broadcast_message(state, &ServerMessage::Op { op: relayed });
                }
                None
            }
            Err(rejection) => {
                debug!(%rejection, "refused client operation");
                Some(rejection.to_string())
            }
        }
    };
    if let Some(message) = rejected {
        let _ = direct.send(ServerMessage::Rejected { message }).await;
    }
}

fn broadcast_message(state: &ServerState, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(frame) => {
            state.broadcast(frame);
        }
        Err(error) => warn!(%error, "failed to serialize broadcast frame"),
    }
}
