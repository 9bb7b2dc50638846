//! Strokeboard WebSocket relay.
//!
//! Hosts one merged Loro document per room and fans messages out to the
//! room's peers. Clients speak the JSON protocol from
//! `strokeboard_core::sync`:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "update", "data": "<base64 loro updates>" }
//! { "type": "presence", "presence": { "cursor": { "x": 1.0, "y": 2.0 }, ... } }
//! { "type": "leave" }
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use loro::{ExportMode, LoroDoc};
use strokeboard_core::sync::{ClientMessage, ServerMessage, decode_bytes, encode_bytes};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// Sender id used for state the relay sends on its own behalf.
pub const RELAY_ID: &str = "relay";

/// Relay settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "strokeboard-relay", about = "WebSocket relay for Strokeboard rooms")]
pub struct RelayConfig {
    /// Address to listen on.
    #[arg(long, env = "STROKEBOARD_BIND", default_value = "0.0.0.0:3030")]
    pub bind: SocketAddr,
    /// Maximum number of rooms kept in memory.
    #[arg(long, env = "STROKEBOARD_MAX_ROOMS", default_value_t = 1024)]
    pub max_rooms: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3030)),
            max_rooms: 1024,
        }
    }
}

type Envelope = (String, ServerMessage);

struct Room {
    /// Every update the room has seen, merged.
    doc: LoroDoc,
    peers: HashSet<String>,
    tx: broadcast::Sender<Envelope>,
    last_active: Instant,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            doc: LoroDoc::new(),
            peers: HashSet::new(),
            tx,
            last_active: Instant::now(),
        }
    }

    /// Merged state for a joiner, or `None` while the room is empty.
    fn snapshot(&self) -> Option<String> {
        if self.doc.oplog_vv().is_empty() {
            return None;
        }
        match self.doc.export(ExportMode::Snapshot) {
            Ok(bytes) => Some(encode_bytes(&bytes)),
            Err(e) => {
                warn!("Snapshot export failed: {}", e);
                None
            }
        }
    }
}

/// Result of a join request.
struct Joined {
    rx: broadcast::Receiver<Envelope>,
    snapshot: Option<String>,
    peer_count: usize,
}

/// Shared relay state.
pub struct AppState {
    rooms: DashMap<String, Room>,
    max_rooms: usize,
}

impl AppState {
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_rooms,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Peers currently in `room_id`.
    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }

    fn join_room(&self, room_id: &str, peer_id: &str) -> Result<Joined, String> {
        if !self.rooms.contains_key(room_id) && self.rooms.len() >= self.max_rooms && !self.evict_idle_room() {
            return Err(format!("room limit of {} reached", self.max_rooms));
        }
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string());
        room.last_active = Instant::now();
        Ok(Joined {
            rx: room.tx.subscribe(),
            snapshot: room.snapshot(),
            peer_count: room.peers.len(),
        })
    }

    /// Empty rooms stay around so a board survives everyone leaving.
    fn leave_room(&self, room_id: &str, peer_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(peer_id);
            room.last_active = Instant::now();
        }
    }

    /// Drop the least recently active room without peers. Returns false
    /// when every room is occupied.
    fn evict_idle_room(&self) -> bool {
        let victim = self
            .rooms
            .iter()
            .filter(|room| room.peers.is_empty())
            .min_by_key(|room| room.last_active)
            .map(|room| room.key().clone());
        match victim {
            Some(id) => {
                let removed = self.rooms.remove_if(&id, |_, room| room.peers.is_empty()).is_some();
                if removed {
                    info!("Evicted idle room {}", id);
                }
                removed
            }
            None => false,
        }
    }

    /// Merge base64 updates into the room document.
    fn apply_update(&self, room_id: &str, data: &str) -> Result<(), String> {
        let bytes = decode_bytes(data).ok_or_else(|| "update is not valid base64".to_string())?;
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| format!("unknown room {}", room_id))?;
        room.last_active = Instant::now();
        room.doc
            .import(&bytes)
            .map(|_| ())
            .map_err(|e| format!("update rejected: {}", e))
    }

    fn snapshot(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).and_then(|room| room.snapshot())
    }

    fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}

/// The relay's routes: `/ws`, `/health` and an index page.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(config: RelayConfig) -> std::io::Result<()> {
    let state = Arc::new(AppState::new(config.max_rooms));
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Strokeboard relay listening on {}", listener.local_addr()?);
    info!("WebSocket endpoint: ws://{}/ws", config.bind);
    axum::serve(listener, app(state)).await
}

async fn index() -> &'static str {
    "Strokeboard Relay - connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serialize and send. Returns false once the client is gone.
async fn send_json(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize server message: {}", e);
            true
        }
    }
}

fn error(message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
    }
}

struct Connection {
    peer_id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

impl Connection {
    fn leave(&mut self, state: &AppState) {
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.peer_id);
            state.broadcast(
                &room,
                &self.peer_id,
                ServerMessage::PeerLeft {
                    connection_id: self.peer_id.clone(),
                },
            );
            info!("Peer {} left room {}", self.peer_id, room);
        }
        self.rx = None;
    }
}

/// Handle one client message. Returns false once the client is gone.
async fn handle_client_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    match msg {
        ClientMessage::Join { room } => {
            conn.leave(state);
            let joined = match state.join_room(&room, &conn.peer_id) {
                Ok(joined) => joined,
                Err(message) => {
                    warn!("Peer {} could not join {}: {}", conn.peer_id, room, message);
                    return send_json(sender, &error(message)).await;
                }
            };
            conn.rx = Some(joined.rx);
            conn.room = Some(room.clone());

            let reply = ServerMessage::Joined {
                room: room.clone(),
                connection_id: conn.peer_id.clone(),
                peer_count: joined.peer_count,
                snapshot: joined.snapshot,
            };
            if !send_json(sender, &reply).await {
                return false;
            }
            state.broadcast(
                &room,
                &conn.peer_id,
                ServerMessage::PeerJoined {
                    connection_id: conn.peer_id.clone(),
                },
            );
            info!("Peer {} joined room {} ({} peers)", conn.peer_id, room, joined.peer_count);
            true
        }
        ClientMessage::Leave => {
            conn.leave(state);
            true
        }
        ClientMessage::Update { data } => {
            let Some(room) = conn.room.clone() else {
                return send_json(sender, &error("join a room first")).await;
            };
            if let Err(message) = state.apply_update(&room, &data) {
                warn!("Rejected update from {}: {}", conn.peer_id, message);
                return send_json(sender, &error(message)).await;
            }
            debug!("Update from {} in {} ({} chars)", conn.peer_id, room, data.len());
            state.broadcast(
                &room,
                &conn.peer_id,
                ServerMessage::Update {
                    from: conn.peer_id.clone(),
                    data,
                },
            );
            true
        }
        ClientMessage::Presence { presence } => {
            if let Some(room) = &conn.room {
                state.broadcast(
                    room,
                    &conn.peer_id,
                    ServerMessage::Presence {
                        from: conn.peer_id.clone(),
                        presence,
                    },
                );
            }
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut conn = Connection {
        peer_id: Uuid::new_v4().to_string(),
        room: None,
        rx: None,
    };
    info!("New connection: {}", conn.peer_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(client_msg) => {
                                if !handle_client_message(client_msg, &mut conn, &state, &mut sender).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn.peer_id, e);
                                if !send_json(&mut sender, &error(format!("Invalid message: {}", e))).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn.peer_id, e);
                        break;
                    }
                }
            }

            envelope = async {
                match &mut conn.rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match envelope {
                    Ok((from, msg)) => {
                        if from != conn.peer_id && !send_json(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Peer {} lagged, {} messages dropped; resending room state", conn.peer_id, skipped);
                        let resync = conn
                            .room
                            .as_deref()
                            .and_then(|room| state.snapshot(room))
                            .map(|data| ServerMessage::Update {
                                from: RELAY_ID.to_string(),
                                data,
                            });
                        if let Some(msg) = resync {
                            if !send_json(&mut sender, &msg).await {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => conn.rx = None,
                }
            }
        }
    }

    conn.leave(&state);
    info!("Connection closed: {}", conn.peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_limit() {
        let state = AppState::new(1);
        assert!(state.join_room("a", "p1").is_ok());
        assert!(state.join_room("a", "p2").is_ok());
        assert!(state.join_room("b", "p3").is_err());
        assert_eq!(state.room_count(), 1);
        assert_eq!(state.peer_count("a"), 2);
    }

    #[test]
    fn test_idle_room_is_evicted_at_the_limit() {
        let state = AppState::new(1);
        state.join_room("a", "p1").unwrap();
        state.leave_room("a", "p1");

        assert!(state.join_room("b", "p2").is_ok());
        assert_eq!(state.room_count(), 1);
        assert_eq!(state.peer_count("b"), 1);
        assert_eq!(state.peer_count("a"), 0);
    }

    #[test]
    fn test_eviction_prefers_the_oldest_idle_room() {
        let state = AppState::new(3);
        state.join_room("old", "p1").unwrap();
        state.leave_room("old", "p1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        state.join_room("recent", "p2").unwrap();
        state.leave_room("recent", "p2");
        state.join_room("busy", "p3").unwrap();

        state.join_room("new", "p4").unwrap();
        assert_eq!(state.room_count(), 3);
        assert!(state.rooms.contains_key("recent"));
        assert!(state.rooms.contains_key("busy"));
        assert!(!state.rooms.contains_key("old"));
    }

    #[test]
    fn test_room_outlives_its_peers() {
        let state = AppState::new(4);
        state.join_room("a", "p1").unwrap();
        let doc = LoroDoc::new();
        doc.get_map("strokes").insert("s", 1).unwrap();
        doc.commit();
        let data = encode_bytes(&doc.export(ExportMode::Snapshot).unwrap());
        state.apply_update("a", &data).unwrap();
        state.leave_room("a", "p1");

        let joined = state.join_room("a", "p2").unwrap();
        assert_eq!(joined.peer_count, 1);
        assert!(joined.snapshot.is_some());
    }

    #[test]
    fn test_bad_updates_are_rejected() {
        let state = AppState::new(4);
        assert!(state.apply_update("missing", "AAAA").is_err());
        state.join_room("a", "p1").unwrap();
        assert!(state.apply_update("a", "not base64!").is_err());
        assert!(state.apply_update("a", &encode_bytes(b"garbage")).is_err());
        assert!(state.snapshot("a").is_none());
    }

    #[test]
    fn test_config_parses_flags() {
        let config = RelayConfig::try_parse_from(["strokeboard-relay", "--bind", "127.0.0.1:9000", "--max-rooms", "3"])
            .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_rooms, 3);
    }
}
