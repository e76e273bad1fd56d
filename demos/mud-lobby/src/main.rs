use std::sync::Arc;

use mudlink::prelude::*;
use mudlink::WsConnectionManager;
use serde_json::json;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

const ROOMS: &[(&str, &str)] = &[
    ("lobby", "The Lobby"),
    ("library", "The Library"),
    ("garden", "The Garden"),
];

const START_ROOM: &str = "lobby";

/// Seeds a store with the demo rooms and one character per account.
fn seed_store(accounts: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    for (id, name) in ROOMS {
        store.insert_room(RoomRecord {
            id: RoomId::new(*id),
            name: (*name).to_string(),
        });
    }
    for account in accounts {
        store.insert_player(PlayerRecord {
            player_id: PlayerId::new_v4(),
            user_id: (*account).to_string(),
            name: capitalize(account),
            current_room_id: Some(RoomId::new(START_ROOM)),
            last_active_ms: None,
        });
    }
    store
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Game loop
// ---------------------------------------------------------------------------

/// A tiny game layer: chat, movement, and a who list.
struct Lobby {
    manager: Arc<WsConnectionManager<MemoryStore>>,
    store: Arc<MemoryStore>,
}

impl Lobby {
    fn new(manager: Arc<WsConnectionManager<MemoryStore>>, store: Arc<MemoryStore>) -> Self {
        Self { manager, store }
    }

    async fn run(self, mut commands: mpsc::Receiver<PlayerCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        tracing::info!("command queue closed, lobby stopping");
    }

    async fn handle(&self, command: PlayerCommand) {
        let player_id = command.player_id;
        let text = command.args.join(" ");
        match command.command.as_str() {
            "say" if !text.is_empty() => self.say(player_id, text).await,
            "shout" if !text.is_empty() => self.shout(player_id, text).await,
            "go" if !text.is_empty() => self.go(player_id, &text).await,
            "who" => self.who(player_id).await,
            "look" => self.look(player_id).await,
            "say" | "shout" | "go" => {
                self.reply_error(player_id, "usage", format!("{} needs an argument", command.command))
                    .await;
            }
            other => {
                self.reply_error(player_id, "unknown_command", format!("unknown command: {other}"))
                    .await;
            }
        }
    }

    async fn name_of(&self, player_id: &PlayerId) -> String {
        self.manager
            .online_record(player_id)
            .await
            .map(|r| r.display_name)
            .unwrap_or_else(|| player_id.to_string())
    }

    async fn say(&self, player_id: PlayerId, text: String) {
        let Some(room_id) = self.manager.room_of(&player_id).await else {
            self.reply_error(player_id, "not_in_room", "you are nowhere").await;
            return;
        };
        let event = GameEvent::new(
            "say",
            json!({ "from": self.name_of(&player_id).await, "text": text }),
        )
        .for_player(player_id)
        .in_room(room_id.clone());
        self.manager
            .broadcast_to_room(&room_id, &event, Some(player_id))
            .await;
    }

    async fn shout(&self, player_id: PlayerId, text: String) {
        let event = GameEvent::new(
            "shout",
            json!({ "from": self.name_of(&player_id).await, "text": text }),
        )
        .for_player(player_id);
        self.manager.broadcast_global(&event, Some(player_id)).await;
    }

    async fn go(&self, player_id: PlayerId, destination: &str) {
        let room_id = self.manager.canonical_room_id(destination).await;
        let room = match self.store.get_room_by_id(&room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                self.reply_error(player_id, "no_such_room", format!("there is no {destination}"))
                    .await;
                return;
            }
            Err(e) => {
                tracing::warn!(%player_id, error = %e, "room lookup failed");
                self.reply_error(player_id, "no_such_room", "the way is blocked").await;
                return;
            }
        };

        let name = self.name_of(&player_id).await;
        let previous = self.manager.room_of(&player_id).await;
        if self.manager.subscribe_to_room(player_id, &room.id).await.is_none() {
            return;
        }

        if let Some(previous) = previous.filter(|p| *p != room.id) {
            let left = GameEvent::new("left", json!({ "name": name, "to": room.id }))
                .in_room(previous.clone());
            self.manager.broadcast_to_room(&previous, &left, Some(player_id)).await;
        }
        let arrived = GameEvent::new("arrived", json!({ "name": name })).in_room(room.id.clone());
        self.manager
            .broadcast_to_room(&room.id, &arrived, Some(player_id))
            .await;

        let moved = GameEvent::new("moved", json!({ "room_id": room.id, "name": room.name }))
            .for_player(player_id)
            .in_room(room.id);
        self.manager.send_personal_message(player_id, &moved).await;
    }

    async fn who(&self, player_id: PlayerId) {
        let mut names: Vec<String> = self
            .manager
            .online_players()
            .await
            .into_iter()
            .map(|r| r.display_name)
            .collect();
        names.sort();
        let event = GameEvent::new("who", json!({ "players": names })).for_player(player_id);
        self.manager.send_personal_message(player_id, &event).await;
    }

    async fn look(&self, player_id: PlayerId) {
        let Some(room_id) = self.manager.room_of(&player_id).await else {
            self.reply_error(player_id, "not_in_room", "you are nowhere").await;
            return;
        };
        let mut here = Vec::new();
        for occupant in self.manager.room_occupants(&room_id).await {
            if occupant != player_id {
                here.push(self.name_of(&occupant).await);
            }
        }
        here.sort();
        let event = GameEvent::new("room", json!({ "room_id": room_id, "players": here }))
            .for_player(player_id)
            .in_room(room_id);
        self.manager.send_personal_message(player_id, &event).await;
    }

    async fn reply_error(&self, player_id: PlayerId, error_type: &str, message: impl Into<String>) {
        let event = GameEvent::error(error_type, message).for_player(player_id);
        self.manager.send_personal_message(player_id, &event).await;
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info,mudlink=debug");

    let bind = std::env::var("MUD_LOBBY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let secret = std::env::var("MUD_LOBBY_JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("MUD_LOBBY_JWT_SECRET not set, using an insecure development secret");
        "dev-secret".into()
    });

    let store = Arc::new(seed_store(&["alice", "bob", "carol"]));
    let mut server = MudlinkServer::builder()
        .bind(&bind)
        .config(ManagerConfig::from_env())
        .store(Arc::clone(&store))
        .build(JwtDecoder::new(secret.as_bytes()))
        .await?;

    let commands = server
        .take_commands()
        .ok_or("command queue already taken")?;
    tokio::spawn(Lobby::new(server.manager(), store).run(commands));

    tracing::info!(addr = %server.local_addr()?, "mud lobby listening");
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
