//! Per-connection handler: handshake, identity, and frame routing.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `handshake` within `handshake_timeout`
//!   2. Resolve the token to an [`Identity`]
//!   3. `connect_websocket` registers the socket and sends `connected`
//!   4. Loop: `ping` → `pong`, `command` → game layer, `disconnect` → done

use std::sync::Arc;

use mudlink_protocol::{ClientFrame, Codec, GameEvent, ProtocolError, SessionId};
use mudlink_session::Identity;
use mudlink_store::PlayerStore;
use mudlink_transport::{Connection, ConnectionId, WebSocketConnection};
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;

use crate::server::{PlayerCommand, ServerState, WsConnectionManager};
use crate::MudlinkError;

/// Drop guard that reaps the socket when the handler exits.
///
/// Runs even if the handler panics. `Drop` is synchronous, so the async
/// cleanup is spawned as a fire-and-forget task.
struct ConnectionGuard<S: PlayerStore> {
    connection_id: ConnectionId,
    manager: Arc<WsConnectionManager<S>>,
}

impl<S: PlayerStore> Drop for ConnectionGuard<S> {
    fn drop(&mut self) {
        let connection_id = self.connection_id.clone();
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            manager.disconnect_websocket(&connection_id).await;
        });
    }
}

/// Handles a single socket from accept to close.
pub(crate) async fn handle_connection<S: PlayerStore>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S>>,
) -> Result<(), MudlinkError> {
    let conn = Arc::new(conn);
    let connection_id = conn.id();
    tracing::debug!(%connection_id, "handling new connection");

    // --- Step 1: Handshake ---
    let (identity, requested_session) = perform_handshake(&conn, &state).await?;
    let player_id = identity.player_id;
    tracing::info!(
        %connection_id,
        %player_id,
        name = %identity.display_name,
        "player authenticated"
    );

    // --- Step 2: Register ---
    let outcome = state
        .manager
        .connect_websocket(Arc::clone(&conn), player_id, requested_session)
        .await;
    if !outcome.registered {
        return Ok(());
    }
    let _guard = ConnectionGuard {
        connection_id: connection_id.clone(),
        manager: Arc::clone(&state.manager),
    };

    // --- Step 3: Frame loop ---
    let idle_timeout = state.manager.config().idle_timeout;
    loop {
        let data = match tokio::time::timeout(idle_timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%player_id, %connection_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%player_id, %connection_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%player_id, %connection_id, "connection idle, dropping");
                break;
            }
        };

        let frame: ClientFrame = match state.codec.decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(%player_id, error = %e, "failed to decode frame");
                send_event(&conn, &state, &GameEvent::error("invalid_frame", e.to_string())).await?;
                continue;
            }
        };

        match frame {
            ClientFrame::Ping => {
                state.manager.mark_player_seen(player_id).await;
                let pong = GameEvent::new("pong", json!({})).for_player(player_id);
                send_event(&conn, &state, &pong).await?;
            }
            ClientFrame::Command { command, args } => {
                state.manager.mark_player_seen(player_id).await;
                if !state.manager.check_message_rate(player_id, &connection_id) {
                    send_event(
                        &conn,
                        &state,
                        &GameEvent::error("rate_limited", "too many commands, slow down"),
                    )
                    .await?;
                    continue;
                }
                let forwarded = PlayerCommand {
                    player_id,
                    connection_id: connection_id.clone(),
                    command,
                    args,
                };
                if let Err(e) = state.commands.try_send(forwarded) {
                    let reason = match e {
                        TrySendError::Full(_) => "server busy",
                        TrySendError::Closed(_) => "no game loop is accepting commands",
                    };
                    tracing::warn!(%player_id, reason, "command dropped");
                    send_event(&conn, &state, &GameEvent::error("command_dropped", reason)).await?;
                }
            }
            ClientFrame::Handshake { .. } => {
                send_event(
                    &conn,
                    &state,
                    &GameEvent::error("already_authenticated", "handshake already completed"),
                )
                .await?;
            }
            ClientFrame::Disconnect { reason } => {
                tracing::info!(%player_id, %connection_id, %reason, "client disconnected");
                break;
            }
        }
    }

    // _guard drops here → disconnect_websocket fires.
    Ok(())
}

/// Receives the handshake frame and resolves its token.
async fn perform_handshake<S: PlayerStore>(
    conn: &WebSocketConnection,
    state: &ServerState<S>,
) -> Result<(Identity, Option<SessionId>), MudlinkError> {
    let timeout = state.manager.config().handshake_timeout;
    let data = match tokio::time::timeout(timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(MudlinkError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let frame: ClientFrame = match state.codec.decode(&data) {
        Ok(frame) => frame,
        Err(e) => {
            send_event(conn, state, &GameEvent::error("invalid_frame", e.to_string())).await?;
            return Err(e.into());
        }
    };

    let ClientFrame::Handshake { token, session_id } = frame else {
        send_event(
            conn,
            state,
            &GameEvent::error("handshake_required", "first frame must be a handshake"),
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("first frame must be a handshake".into()).into());
    };

    match state.manager.resolve_identity(&token).await {
        Ok(identity) => Ok((identity, session_id.map(SessionId::new))),
        Err(e) => {
            tracing::info!(connection_id = %conn.id(), error = %e, "handshake rejected");
            send_event(conn, state, &GameEvent::error("auth_failed", "authentication failed"))
                .await?;
            if let Err(close_err) = conn.close().await {
                tracing::debug!(error = %close_err, "close after failed handshake");
            }
            Err(e.into())
        }
    }
}

/// Encodes and sends one event on this socket.
async fn send_event<S: PlayerStore>(
    conn: &WebSocketConnection,
    state: &ServerState<S>,
    event: &GameEvent,
) -> Result<(), MudlinkError> {
    let text = state.codec.encode_text(event)?;
    conn.send_text(&text).await?;
    Ok(())
}
