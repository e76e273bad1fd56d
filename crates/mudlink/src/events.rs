//! In-process event bus feeding the delivery engine.
//!
//! Game systems that do not hold a reference to the manager (movement,
//! combat, chat) publish [`RoutedEvent`]s here. The router task started by
//! [`ConnectionManager::start`] receives each one and hands it to the
//! matching delivery operation.
//!
//! ```text
//! game system ──publish──→ EventBus (broadcast channel) ──→ router task
//!                                                            │
//!                  send_personal_message / broadcast_to_room / broadcast_global
//! ```

use std::sync::Weak;

use mudlink_protocol::{GameEvent, PlayerId, RoomId};
use mudlink_store::PlayerStore;
use mudlink_transport::Connection;
use tokio::sync::broadcast;

use crate::ConnectionManager;

/// Who a routed event is for.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTarget {
    /// One player's sockets.
    Player(PlayerId),
    /// Every online occupant of a room.
    Room(RoomId),
    /// Every online player.
    Global,
}

/// An event plus its destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub target: EventTarget,
    pub event: GameEvent,
    /// Player to skip (usually the sender). Ignored for `Player` targets.
    pub exclude: Option<PlayerId>,
}

impl RoutedEvent {
    pub fn to_player(player_id: PlayerId, event: GameEvent) -> Self {
        Self {
            target: EventTarget::Player(player_id),
            event,
            exclude: None,
        }
    }

    pub fn to_room(room_id: RoomId, event: GameEvent, exclude: Option<PlayerId>) -> Self {
        Self {
            target: EventTarget::Room(room_id),
            event,
            exclude,
        }
    }

    pub fn global(event: GameEvent, exclude: Option<PlayerId>) -> Self {
        Self {
            target: EventTarget::Global,
            event,
            exclude,
        }
    }
}

/// Cheap-to-clone publisher handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RoutedEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Never blocks.
    ///
    /// Returns the number of subscribers that will see it; zero means the
    /// router is not running and the event is dropped.
    pub fn publish(&self, event: RoutedEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!("event published with no subscribers");
                0
            }
        }
    }

    /// Subscribes to every routed event.
    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Dispatches routed events until the bus closes or the manager is
/// dropped.
pub(crate) async fn run_router<C: Connection, S: PlayerStore>(
    manager: Weak<ConnectionManager<C, S>>,
    mut rx: broadcast::Receiver<RoutedEvent>,
) {
    loop {
        let routed = match rx.recv().await {
            Ok(routed) => routed,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event router lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        match routed.target {
            EventTarget::Player(player_id) => {
                manager.send_personal_message(player_id, &routed.event).await;
            }
            EventTarget::Room(room_id) => {
                manager
                    .broadcast_to_room(&room_id, &routed.event, routed.exclude)
                    .await;
            }
            EventTarget::Global => {
                manager.broadcast_global(&routed.event, routed.exclude).await;
            }
        }
    }
    tracing::debug!("event router stopped");
}
