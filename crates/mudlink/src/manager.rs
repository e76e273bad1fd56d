//! The connection manager: one owned aggregate for all real-time state.
//!
//! Everything the connection core knows about live players sits behind
//! this type:
//!
//! ```text
//! ConnectionManager
//!   ├── registry  (Mutex)  sockets, player → sockets, metadata, online records
//!   ├── sessions  (Mutex)  player → current session, session → sockets
//!   ├── presence  (Mutex)  room → occupants
//!   ├── pending   (Mutex)  player → undelivered payloads
//!   └── collaborators      store, token decoder, optimizer, rate limiter
//! ```
//!
//! # Locking rules
//!
//! - No lock is held across a socket send/close or a store call. Work
//!   that needs sockets copies the `Arc<C>` handles out first.
//! - When more than one lock is needed they are taken in the order
//!   registry → sessions → presence → pending.
//!
//! The operations themselves live next to the concern they implement:
//! delivery in `delivery.rs`, reaping in `reaper.rs`, health in
//! `health.rs`. This file holds construction, lifecycle, sessions, room
//! presence, and queries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use mudlink_protocol::{
    unix_millis, GameEvent, PayloadOptimizer, PlayerId, RoomId, SessionId, SizeLimitOptimizer,
};
use mudlink_room::{canonical_room_id, RoomDirectory, RoomPresence, StoreRoomLookup};
use mudlink_session::{
    Identity, IdentityValidator, SessionError, SessionResult, SessionState, SessionTracker,
    TokenDecoder,
};
use mudlink_store::PlayerStore;
use mudlink_transport::{Connection, ConnectionId};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::audit::{LoginAuditLog, LoginAuditRecord};
use crate::delivery::prepare_payload;
use crate::events::{run_router, EventBus};
use crate::health::{run_monitor, HealthReport};
use crate::last_active::{run_worker, LastActiveQueue, LastActiveThrottle, LastActiveWriter};
use crate::pending::PendingQueues;
use crate::rate_limit::{RateLimiter, WindowRateLimiter};
use crate::reaper::CloseOutcome;
use crate::registry::{OnlineRecord, Registry};
use crate::ManagerConfig;

/// Disconnect reason sent to sockets of a superseded session.
pub const REASON_NEW_SESSION: &str = "new game session established";
/// Disconnect reason sent when an independent login is observed.
pub const REASON_NEW_LOGIN: &str = "new login detected";
/// Disconnect reason sent to everyone on shutdown.
pub const REASON_SHUTDOWN: &str = "server shutting down";

const EVENT_BUS_CAPACITY: usize = 1024;

/// What [`ConnectionManager::connect_websocket`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub connection_id: ConnectionId,
    /// The session the socket was registered under.
    pub session_id: SessionId,
    /// Present when connecting started a new session.
    pub session: Option<SessionResult>,
    /// Queued messages delivered to the new socket.
    pub flushed: usize,
    /// `false` if the session was replaced while this socket was being
    /// registered; the socket has been closed again.
    pub registered: bool,
}

/// The real-time connection core.
///
/// `C` is the socket type (a [`WebSocketConnection`] in production, a
/// mock in tests) and `S` the persistence layer. Construct one per
/// process, wrap it in an `Arc`, and call [`start`](Self::start).
///
/// [`WebSocketConnection`]: mudlink_transport::WebSocketConnection
pub struct ConnectionManager<C: Connection, S: PlayerStore> {
    pub(crate) config: ManagerConfig,
    pub(crate) registry: Mutex<Registry<C>>,
    pub(crate) sessions: Mutex<SessionTracker>,
    pub(crate) presence: Mutex<RoomPresence>,
    pub(crate) pending: Mutex<PendingQueues>,
    pub(crate) throttle: Mutex<LastActiveThrottle>,
    pub(crate) optimizer: Arc<dyn PayloadOptimizer>,
    pub(crate) rate_limiter: Arc<dyn RateLimiter>,
    pub(crate) latest_health: Mutex<Option<HealthReport>>,
    store: Option<Arc<S>>,
    store_rooms: Option<StoreRoomLookup<S>>,
    rooms: RoomDirectory,
    validator: IdentityValidator<S>,
    last_active: LastActiveWriter,
    last_active_queue: StdMutex<Option<LastActiveQueue>>,
    audit: LoginAuditLog,
    events: EventBus,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl<C: Connection, S: PlayerStore> ConnectionManager<C, S> {
    /// Creates a manager. Without a store, tokens cannot be resolved,
    /// last-active writes are skipped, and room ids resolve only through
    /// the in-memory [`RoomDirectory`].
    pub fn new(
        config: ManagerConfig,
        decoder: Arc<dyn TokenDecoder>,
        store: Option<Arc<S>>,
    ) -> Self {
        let (last_active, queue) = LastActiveWriter::channel(config.last_active_queue);
        let rate_limiter: Arc<dyn RateLimiter> = Arc::new(WindowRateLimiter::new(
            config.rate_limit_messages,
            config.rate_limit_window,
        ));
        Self {
            registry: Mutex::new(Registry::new()),
            sessions: Mutex::new(SessionTracker::new()),
            presence: Mutex::new(RoomPresence::new()),
            pending: Mutex::new(PendingQueues::new(config.max_pending_messages)),
            throttle: Mutex::new(LastActiveThrottle::new(config.last_active_interval)),
            optimizer: Arc::new(SizeLimitOptimizer::default()),
            rate_limiter,
            latest_health: Mutex::new(None),
            store_rooms: store.clone().map(StoreRoomLookup::new),
            validator: IdentityValidator::new(decoder, store.clone()),
            store,
            rooms: RoomDirectory::new(),
            last_active,
            last_active_queue: StdMutex::new(Some(queue)),
            audit: LoginAuditLog::new(config.login_audit_path()),
            events: EventBus::new(EVENT_BUS_CAPACITY),
            tasks: StdMutex::new(Vec::new()),
            running: AtomicBool::new(false),
            config,
        }
    }

    /// Replaces the default [`SizeLimitOptimizer`].
    pub fn with_optimizer(mut self, optimizer: Arc<dyn PayloadOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Replaces the default [`WindowRateLimiter`].
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The room-manager-scoped directory consulted first when resolving
    /// room ids.
    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    /// Publisher handle for routed events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts the background tasks: health monitor, event router, and
    /// last-active writer. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::warn!("connection manager already started");
            return;
        }

        let mut handles = vec![
            tokio::spawn(run_monitor(Arc::downgrade(self))),
            tokio::spawn(run_router(Arc::downgrade(self), self.events.subscribe())),
        ];

        let queue = self
            .last_active_queue
            .lock()
            .ok()
            .and_then(|mut q| q.take());
        match (queue, &self.store) {
            (Some(queue), Some(store)) => {
                handles.push(tokio::spawn(run_worker(queue, Arc::clone(store))));
            }
            (None, Some(_)) => {
                tracing::warn!("last-active worker already consumed, not restarted");
            }
            (_, None) => {}
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
        tracing::info!("connection manager started");
    }

    /// Stops the background tasks and disconnects every player.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            handle.abort();
        }

        let players = self.registry.lock().await.online_player_ids();
        for player_id in &players {
            self.force_disconnect_player(*player_id, REASON_SHUTDOWN).await;
        }
        tracing::info!(players = players.len(), "connection manager shut down");
    }

    /// `true` between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    /// Registers a freshly authenticated socket.
    ///
    /// `session_id` decides what happens to the player's other sockets:
    ///
    /// - the player's current session: the socket joins it (another tab)
    /// - anything else, or `None`: a new session starts and every older
    ///   socket is disconnected first
    ///
    /// The socket then receives a `connected` event followed by any
    /// messages queued while the player was offline.
    pub async fn connect_websocket(
        &self,
        handle: Arc<C>,
        player_id: PlayerId,
        session_id: Option<SessionId>,
    ) -> ConnectOutcome {
        let connection_id = handle.id();
        let current = self.sessions.lock().await.current(&player_id).cloned();

        let (session_id, session) = match (session_id, current) {
            (Some(requested), Some(current)) if requested == current => (requested, None),
            (requested, _) => {
                let new_session = requested.unwrap_or_else(SessionId::generate);
                let result = self
                    .handle_new_game_session(player_id, new_session.clone())
                    .await;
                (new_session, Some(result))
            }
        };

        let (display_name, start_room) = self.load_player(player_id).await;
        let start_room = match start_room {
            Some(raw) => Some(self.canonical_room_id(raw.as_str()).await),
            None => None,
        };

        // Attach and register in one critical section so a concurrent
        // session replacement either sees this socket or rejects it.
        let attached = {
            let mut registry = self.registry.lock().await;
            let mut sessions = self.sessions.lock().await;
            let attached = sessions.attach(player_id, &session_id, connection_id.clone());
            if attached {
                // Another tab keeps the room the player already moved to.
                let room = registry
                    .online(&player_id)
                    .and_then(|r| r.current_room.clone())
                    .or(start_room);
                registry.register(
                    connection_id.clone(),
                    player_id,
                    Some(session_id.clone()),
                    Arc::clone(&handle),
                );
                registry.upsert_online(
                    player_id,
                    display_name,
                    room.clone(),
                    Some(session_id.clone()),
                );
                if let Some(room) = room {
                    self.presence.lock().await.enter(player_id, room);
                }
            }
            attached
        };

        if !attached {
            tracing::warn!(
                %player_id,
                %connection_id,
                %session_id,
                "session replaced during connect, dropping connection"
            );
            self.graceful_close(&player_id, &connection_id, &handle).await;
            return ConnectOutcome {
                connection_id,
                session_id,
                session,
                flushed: 0,
                registered: false,
            };
        }

        let welcome = GameEvent::new(
            "connected",
            json!({
                "player_id": player_id,
                "session_id": session_id,
                "connection_id": connection_id.as_str(),
            }),
        )
        .for_player(player_id);
        if let Ok(payload) = prepare_payload(&welcome, self.optimizer.as_ref()) {
            if let Err(e) = handle.send_text(&payload.text).await {
                tracing::debug!(%player_id, %connection_id, error = %e, "welcome send failed");
            }
        }

        let flushed = self.flush_pending(player_id, &connection_id, &handle).await;

        tracing::info!(
            %player_id,
            %connection_id,
            %session_id,
            flushed,
            "websocket connected"
        );
        ConnectOutcome {
            connection_id,
            session_id,
            session,
            flushed,
            registered: true,
        }
    }

    /// Sends queued payloads to one socket, oldest first.
    ///
    /// On a failed send the unsent remainder goes back to the front of
    /// the queue and the socket is reaped.
    async fn flush_pending(
        &self,
        player_id: PlayerId,
        connection_id: &ConnectionId,
        handle: &Arc<C>,
    ) -> usize {
        let queued = self.pending.lock().await.take(&player_id);
        let mut sent = 0;
        let mut remaining = queued.into_iter();

        while let Some(payload) = remaining.next() {
            let text = match serde_json::to_string(&payload) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(%player_id, error = %e, "dropping unserializable queued message");
                    continue;
                }
            };
            if let Err(e) = handle.send_text(&text).await {
                tracing::warn!(%player_id, %connection_id, error = %e, "flush failed, requeueing");
                let mut unsent = vec![payload];
                unsent.extend(remaining);
                self.pending.lock().await.requeue_front(player_id, unsent);
                self.cleanup_dead(player_id, connection_id).await;
                return sent;
            }
            sent += 1;
        }
        sent
    }

    async fn load_player(&self, player_id: PlayerId) -> (String, Option<RoomId>) {
        let fallback = (player_id.to_string(), None);
        let Some(store) = &self.store else {
            return fallback;
        };
        match store.get_player(player_id).await {
            Ok(Some(record)) => (record.name, record.current_room_id),
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!(%player_id, error = %e, "player lookup failed");
                fallback
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Makes `new_session_id` the player's only session.
    ///
    /// Every socket the player has is removed from the registry in the
    /// same critical section that records the new session, so there is no
    /// moment where two sessions look valid. The removed sockets are then
    /// told why and closed. Per-player ephemeral state (rate limits,
    /// queued messages, last-active throttle, room presence) is cleared;
    /// last-seen goes with the online record.
    ///
    /// Never fails; check [`SessionResult::success`].
    pub async fn handle_new_game_session(
        &self,
        player_id: PlayerId,
        new_session_id: SessionId,
    ) -> SessionResult {
        let mut result = SessionResult::pending(player_id, new_session_id.clone());

        // The old sockets leave the registry in the same critical section
        // that installs the new session, so none is reachable under it.
        let (taken, previous) = {
            let mut registry = self.registry.lock().await;
            let mut sessions = self.sessions.lock().await;
            let taken = registry.remove_player(&player_id);
            for (connection_id, _) in &taken {
                sessions.detach(connection_id);
            }
            let previous = sessions.begin(player_id, new_session_id.clone());
            self.presence.lock().await.prune_player(&player_id);
            (taken, previous)
        };
        result.websocket_connections = taken.len();
        result.previous_session_id = previous;

        let notice = disconnect_notice(player_id, REASON_NEW_SESSION);
        let notice = prepare_payload(&notice, self.optimizer.as_ref()).ok();
        for (connection_id, handle) in &taken {
            if let Some(handle) = handle {
                if let Some(notice) = &notice {
                    if let Err(e) = handle.send_text(&notice.text).await {
                        tracing::debug!(%player_id, %connection_id, error = %e, "disconnect notice not delivered");
                    }
                }
                if let CloseOutcome::Failed(message) =
                    self.graceful_close(&player_id, connection_id, handle).await
                {
                    result.record_error(format!("close {connection_id}: {message}"));
                }
            }
            self.rate_limiter.remove_connection_message_data(connection_id);
            result.connections_disconnected += 1;
        }

        self.rate_limiter.remove_player_data(&player_id);
        self.pending.lock().await.clear(&player_id);
        self.throttle.lock().await.forget(&player_id);

        tracing::info!(
            %player_id,
            new_session = %result.new_session_id,
            previous_session = result
                .previous_session_id
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or("none"),
            disconnected = result.connections_disconnected,
            success = result.success,
            "new game session"
        );
        result
    }

    /// Reacts to an independent login: disconnects every existing socket
    /// and appends an audit record.
    ///
    /// The audit write happens after the disconnect and cannot block it.
    pub async fn handle_new_login(&self, player_id: PlayerId) {
        let existing = self.registry.lock().await.connections_for(&player_id).len();
        self.force_disconnect_player(player_id, REASON_NEW_LOGIN).await;

        let record = LoginAuditRecord::new_login(player_id, existing, unix_millis());
        self.audit.append(&record).await;
        tracing::info!(%player_id, existing, "new login handled");
    }

    pub async fn session_state(&self, player_id: &PlayerId) -> SessionState {
        self.sessions.lock().await.state(player_id)
    }

    /// Sockets registered under one of the player's sessions, in
    /// registration order.
    pub async fn session_connections(
        &self,
        player_id: &PlayerId,
        session_id: &SessionId,
    ) -> Vec<ConnectionId> {
        self.sessions
            .lock()
            .await
            .connections(player_id, session_id)
            .to_vec()
    }

    // -----------------------------------------------------------------------
    // Identity and activity
    // -----------------------------------------------------------------------

    /// `true` only if `token` belongs to `player_id`. Fails closed.
    pub async fn validate_token(&self, token: &str, player_id: PlayerId) -> bool {
        self.validator.validate(token, player_id).await
    }

    /// Resolves a bearer token to the identity it belongs to.
    ///
    /// # Errors
    /// See [`IdentityValidator::resolve`].
    pub async fn resolve_identity(&self, token: &str) -> Result<Identity, SessionError> {
        self.validator.resolve(token).await
    }

    /// Records activity for an online player.
    ///
    /// Last-seen is updated in memory right away. The store's last-active
    /// timestamp is written at most once per `last_active_interval`, by
    /// the background writer.
    pub async fn mark_player_seen(&self, player_id: PlayerId) {
        let now = Instant::now();
        if !self.registry.lock().await.touch(&player_id, now) {
            tracing::debug!(%player_id, "mark seen for offline player ignored");
            return;
        }
        if self.store.is_none() {
            return;
        }
        let due = self.throttle.lock().await.should_persist(player_id, now);
        if due {
            self.last_active.enqueue(player_id, unix_millis());
        }
    }

    /// Counts one inbound message against the socket's rate limit.
    pub fn check_message_rate(&self, player_id: PlayerId, connection_id: &ConnectionId) -> bool {
        self.rate_limiter.check_message(player_id, connection_id)
    }

    // -----------------------------------------------------------------------
    // Room presence
    // -----------------------------------------------------------------------

    /// Resolves a raw room id through the room directory, then the store.
    /// Falls back to the raw id.
    pub async fn canonical_room_id(&self, raw_id: &str) -> RoomId {
        canonical_room_id(Some(&self.rooms), self.store_rooms.as_ref(), raw_id).await
    }

    /// Moves an online player into a room.
    ///
    /// Returns the canonical room id, or `None` if the player is offline.
    pub async fn subscribe_to_room(&self, player_id: PlayerId, room_id: &RoomId) -> Option<RoomId> {
        let room_id = self.canonical_room_id(room_id.as_str()).await;
        let mut registry = self.registry.lock().await;
        if !registry.is_online(&player_id) {
            tracing::debug!(%player_id, %room_id, "ignoring room subscribe for offline player");
            return None;
        }
        registry.set_room(&player_id, Some(room_id.clone()));
        self.presence.lock().await.enter(player_id, room_id.clone());
        Some(room_id)
    }

    /// Takes a player out of a room. Returns `false` if they were not in it.
    pub async fn unsubscribe_from_room(&self, player_id: PlayerId, room_id: &RoomId) -> bool {
        let room_id = self.canonical_room_id(room_id.as_str()).await;
        let mut registry = self.registry.lock().await;
        let left = self.presence.lock().await.leave(&player_id, &room_id);
        if left {
            registry.set_room(&player_id, None);
        }
        left
    }

    /// Online occupants of a room, after reconciling presence.
    pub async fn room_occupants(&self, room_id: &RoomId) -> Vec<PlayerId> {
        let room_id = self.canonical_room_id(room_id.as_str()).await;
        self.reconciled_occupants(&room_id).await
    }

    /// Drops occupants of a room who are no longer online. Returns them.
    pub async fn reconcile_room_presence(&self, room_id: &RoomId) -> Vec<PlayerId> {
        let room_id = self.canonical_room_id(room_id.as_str()).await;
        let registry = self.registry.lock().await;
        self.presence
            .lock()
            .await
            .reconcile(&room_id, |p| registry.is_online(p))
    }

    /// The room presence currently places the player in.
    pub async fn room_of(&self, player_id: &PlayerId) -> Option<RoomId> {
        self.presence.lock().await.room_of(player_id).cloned()
    }

    pub(crate) async fn reconciled_occupants(&self, room_id: &RoomId) -> Vec<PlayerId> {
        let registry = self.registry.lock().await;
        let mut presence = self.presence.lock().await;
        presence.reconcile(room_id, |p| registry.is_online(p));
        presence.occupants(room_id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn is_online(&self, player_id: &PlayerId) -> bool {
        self.registry.lock().await.is_online(player_id)
    }

    pub async fn online_player_ids(&self) -> Vec<PlayerId> {
        self.registry.lock().await.online_player_ids()
    }

    pub async fn online_players(&self) -> Vec<OnlineRecord> {
        self.registry.lock().await.online_players()
    }

    pub async fn online_record(&self, player_id: &PlayerId) -> Option<OnlineRecord> {
        self.registry.lock().await.online(player_id).cloned()
    }

    /// A player's sockets in registration order. Empty for offline players.
    pub async fn connections_for_player(&self, player_id: &PlayerId) -> Vec<ConnectionId> {
        self.registry.lock().await.connections_for(player_id)
    }

    /// `true` if the socket is in the active map.
    pub async fn has_connection(&self, connection_id: &ConnectionId) -> bool {
        self.registry.lock().await.contains(connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.connection_count()
    }

    pub async fn pending_message_count(&self, player_id: &PlayerId) -> usize {
        self.pending.lock().await.len_for(player_id)
    }

    /// Queued payloads for a player, without removing them.
    pub async fn pending_messages(&self, player_id: &PlayerId) -> Vec<Value> {
        self.pending.lock().await.peek(player_id)
    }

    /// Removes and returns a player's queued payloads, oldest first.
    pub async fn take_pending_messages(&self, player_id: &PlayerId) -> Vec<Value> {
        self.pending.lock().await.take(player_id)
    }

    #[cfg(test)]
    pub(crate) async fn has_player_key(&self, player_id: &PlayerId) -> bool {
        self.registry.lock().await.has_player_key(player_id)
    }
}

/// The event a socket receives right before the server closes it.
pub(crate) fn disconnect_notice(player_id: PlayerId, reason: &str) -> GameEvent {
    GameEvent::new("disconnected", json!({ "reason": reason })).for_player(player_id)
}
