//! Network session: keeps a [`LoroStore`] replica in step with a relay room.
//!
//! The session never touches the engine. The bridge reconciles the engine
//! with the store; the session moves store operations over the wire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use loro::VersionVector;

use crate::store::{ConnectionStatus, LoroStore, Presence, SharedStore};
use crate::sync::{ClientMessage, NativeWebSocket, SyncError, SyncEvent, Transport, encode_bytes};

/// Default delay before reconnecting after the link dropped.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay WebSocket URL, e.g. `ws://localhost:3030/ws`.
    pub url: String,
    pub room: String,
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room: room.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// One client's connection to a relay room.
pub struct CollabSession<T: Transport = NativeWebSocket> {
    store: Arc<LoroStore>,
    transport: T,
    config: SessionConfig,
    joined: bool,
    /// Document version covered by the last update we sent.
    sent_version: Option<VersionVector>,
    /// Presence to replay for new peers and after rejoining.
    last_presence: Option<Presence>,
    retry_at: Option<Instant>,
}

impl CollabSession<NativeWebSocket> {
    /// Open a session over a native WebSocket.
    pub fn connect(config: SessionConfig) -> Result<Self, SyncError> {
        let mut session = Self::with_transport(NativeWebSocket::new(), config);
        session.start()?;
        Ok(session)
    }
}

impl<T: Transport> CollabSession<T> {
    /// Create an unconnected session over `transport` with a fresh replica.
    pub fn with_transport(transport: T, config: SessionConfig) -> Self {
        Self {
            store: Arc::new(LoroStore::new()),
            transport,
            config,
            joined: false,
            sent_version: None,
            last_presence: None,
            retry_at: None,
        }
    }

    /// The replica the bridge should reconcile against.
    pub fn store(&self) -> &Arc<LoroStore> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn room(&self) -> &str {
        &self.config.room
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn status(&self) -> ConnectionStatus {
        self.store.status()
    }

    /// Open the transport.
    pub fn start(&mut self) -> Result<(), SyncError> {
        self.store.set_status(ConnectionStatus::Connecting);
        self.transport.connect(&self.config.url)
    }

    /// Leave the room and close the transport. No reconnect follows.
    pub fn leave(&mut self) {
        if self.joined {
            let _ = self.send(&ClientMessage::Leave);
        }
        self.transport.disconnect();
        self.joined = false;
        self.retry_at = None;
        self.store.clear_participants();
        self.store.set_status(ConnectionStatus::Disconnected);
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), SyncError> {
        let json = serde_json::to_string(msg)?;
        self.transport.send(&json)
    }

    /// Drain transport events and retry a dropped connection when due.
    /// Returns true if the replica received remote document changes.
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for event in self.transport.poll_events() {
            changed |= self.handle_event(event, now);
        }

        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            log::info!("Reconnecting to {}", self.config.url);
            if let Err(e) = self.transport.connect(&self.config.url) {
                log::warn!("Reconnect failed: {}", e);
                self.retry_at = Some(now + self.config.reconnect_delay);
            }
        }
        changed
    }

    /// Apply one transport event. Returns true if the replica changed.
    pub fn handle_event(&mut self, event: SyncEvent, now: Instant) -> bool {
        match event {
            SyncEvent::Connected => {
                let join = ClientMessage::Join {
                    room: self.config.room.clone(),
                };
                if let Err(e) = self.send(&join) {
                    log::warn!("Failed to send join: {}", e);
                }
                false
            }
            SyncEvent::JoinedRoom {
                room,
                connection_id,
                peer_count,
                snapshot,
            } => {
                log::info!("Joined room {} as {} ({} peers)", room, connection_id, peer_count);
                self.store.set_connection_id(Some(connection_id));
                self.store.set_status(ConnectionStatus::Connected);
                self.joined = true;
                // The relay may lack anything we wrote while offline.
                self.sent_version = None;
                if let Some(presence) = self.last_presence.clone() {
                    let _ = self.store.set_presence(&presence);
                }
                match snapshot {
                    Some(bytes) => self.import(&bytes),
                    None => false,
                }
            }
            SyncEvent::PeerJoined { connection_id } => {
                log::info!("Peer joined: {}", connection_id);
                if let Some(presence) = self.last_presence.clone() {
                    let _ = self.store.set_presence(&presence);
                }
                false
            }
            SyncEvent::PeerLeft { connection_id } => {
                log::info!("Peer left: {}", connection_id);
                self.store.remove_participant(&connection_id);
                false
            }
            SyncEvent::UpdateReceived { from, data } => {
                log::debug!("Update from {} ({} bytes)", from, data.len());
                self.import(&data)
            }
            SyncEvent::PresenceReceived { from, presence } => {
                self.store.apply_remote_presence(&from, presence);
                false
            }
            SyncEvent::Error { message } => {
                log::warn!("Relay error: {}", message);
                false
            }
            SyncEvent::Disconnected => {
                log::info!("Disconnected from relay, retrying in {:?}", self.config.reconnect_delay);
                self.joined = false;
                self.store.clear_participants();
                self.store.set_status(ConnectionStatus::Reconnecting);
                self.retry_at = Some(now + self.config.reconnect_delay);
                false
            }
        }
    }

    fn import(&mut self, bytes: &[u8]) -> bool {
        let before = self.store.version();
        if let Err(e) = self.store.import(bytes) {
            log::warn!("Failed to import remote update: {}", e);
            return false;
        }
        let after = self.store.version();
        // The relay already holds whatever it just sent us. Count those ops
        // as sent so pending local work goes out without them.
        let mut sent = self.sent_version.take().unwrap_or_default();
        for (peer, counter) in after.iter() {
            if before.get(peer) != Some(counter) && sent.get(peer).is_none_or(|c| c < counter) {
                sent.insert(*peer, *counter);
            }
        }
        self.sent_version = Some(sent);
        after != before
    }

    /// Send local document changes and presence written since the last flush.
    /// Does nothing until the room is joined; pending changes stay in the
    /// replica and go out after reconnecting.
    pub fn flush(&mut self) -> Result<(), SyncError> {
        if !self.joined {
            return Ok(());
        }

        let version = self.store.version();
        if self.sent_version.as_ref() != Some(&version) {
            let since = self.sent_version.clone().unwrap_or_default();
            let bytes = self
                .store
                .export_updates_since(&since)
                .map_err(|e| SyncError::Send(e.to_string()))?;
            self.send(&ClientMessage::Update {
                data: encode_bytes(&bytes),
            })?;
            self.sent_version = Some(version);
        }

        if let Some(presence) = self.store.take_outgoing_presence() {
            self.send(&ClientMessage::Presence {
                presence: presence.clone(),
            })?;
            self.last_presence = Some(presence);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ReconciliationBridge;
    use crate::engine::DrawingEngine;
    use crate::store::SharedStore;
    use crate::sync::decode_bytes;
    use kurbo::Point;

    #[derive(Default)]
    struct MockTransport {
        connects: usize,
        sent: Vec<ClientMessage>,
        inbox: Vec<SyncEvent>,
        status: ConnectionStatus,
    }

    impl Transport for MockTransport {
        fn connect(&mut self, _url: &str) -> Result<(), SyncError> {
            self.connects += 1;
            self.status = ConnectionStatus::Connecting;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.status = ConnectionStatus::Disconnected;
        }

        fn send(&mut self, msg: &str) -> Result<(), SyncError> {
            self.sent.push(serde_json::from_str(msg)?);
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<SyncEvent> {
            std::mem::take(&mut self.inbox)
        }

        fn status(&self) -> ConnectionStatus {
            self.status
        }
    }

    fn joined_session() -> CollabSession<MockTransport> {
        let mut session =
            CollabSession::with_transport(MockTransport::default(), SessionConfig::new("ws://relay/ws", "room-1"));
        session.start().unwrap();
        let now = Instant::now();
        session.handle_event(SyncEvent::Connected, now);
        session.handle_event(
            SyncEvent::JoinedRoom {
                room: "room-1".to_string(),
                connection_id: "me".to_string(),
                peer_count: 1,
                snapshot: None,
            },
            now,
        );
        session
    }

    fn last_update(session: &CollabSession<MockTransport>) -> Vec<u8> {
        session
            .transport()
            .sent
            .iter()
            .rev()
            .find_map(|m| match m {
                ClientMessage::Update { data } => decode_bytes(data),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_connect_sends_join() {
        let session = joined_session();
        assert_eq!(session.transport().connects, 1);
        assert_eq!(
            session.transport().sent[0],
            ClientMessage::Join {
                room: "room-1".to_string()
            }
        );
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.store().connection_id().as_deref(), Some("me"));
    }

    #[test]
    fn test_snapshot_reaches_engine_through_bridge() {
        let remote = LoroStore::new();
        let mut author = DrawingEngine::new();
        author.pointer_down(Point::new(1.0, 1.0), "y", "Y");
        author.pointer_up();
        ReconciliationBridge::new().sync(&mut author, &remote);

        let mut session =
            CollabSession::with_transport(MockTransport::default(), SessionConfig::new("ws://relay/ws", "room-1"));
        let changed = session.handle_event(
            SyncEvent::JoinedRoom {
                room: "room-1".to_string(),
                connection_id: "me".to_string(),
                peer_count: 2,
                snapshot: Some(remote.export_snapshot().unwrap()),
            },
            Instant::now(),
        );
        assert!(changed);

        let mut engine = DrawingEngine::new();
        let mut bridge = ReconciliationBridge::new();
        assert!(bridge.sync(&mut engine, session.store().as_ref()));
        assert_eq!(engine.state().strokes.len(), 1);
    }

    #[test]
    fn test_flush_sends_local_changes_once() {
        let mut session = joined_session();
        let mut engine = DrawingEngine::new();
        let mut bridge = ReconciliationBridge::new();
        engine.pointer_down(Point::ZERO, "x", "X");
        engine.pointer_up();
        bridge.sync(&mut engine, session.store().as_ref());

        session.flush().unwrap();
        let peer = LoroStore::new();
        peer.import(&last_update(&session)).unwrap();
        assert_eq!(peer.stroke_ids().unwrap().len(), 1);

        let sent = session.transport().sent.len();
        session.flush().unwrap();
        assert_eq!(session.transport().sent.len(), sent);
    }

    #[test]
    fn test_remote_update_is_not_sent_back() {
        let mut session = joined_session();
        session.flush().unwrap();
        let sent = session.transport().sent.len();

        let remote = LoroStore::new();
        let mut author = DrawingEngine::new();
        author.pointer_down(Point::ZERO, "y", "Y");
        author.pointer_up();
        ReconciliationBridge::new().sync(&mut author, &remote);

        let changed = session.handle_event(
            SyncEvent::UpdateReceived {
                from: "peer".to_string(),
                data: remote.export_snapshot().unwrap(),
            },
            Instant::now(),
        );
        assert!(changed);
        session.flush().unwrap();
        assert_eq!(session.transport().sent.len(), sent);
    }

    #[test]
    fn test_pending_edits_go_out_without_imported_ops() {
        let mut session = joined_session();
        let mut engine = DrawingEngine::new();
        let mut bridge = ReconciliationBridge::new();
        engine.pointer_down(Point::ZERO, "x", "X");
        engine.pointer_up();
        bridge.sync(&mut engine, session.store().as_ref());

        let remote = LoroStore::new();
        let mut author = DrawingEngine::new();
        author.pointer_down(Point::new(5.0, 5.0), "y", "Y");
        author.pointer_up();
        ReconciliationBridge::new().sync(&mut author, &remote);
        session.handle_event(
            SyncEvent::UpdateReceived {
                from: "peer".to_string(),
                data: remote.export_snapshot().unwrap(),
            },
            Instant::now(),
        );
        assert_eq!(session.store().stroke_ids().unwrap().len(), 2);

        session.flush().unwrap();
        let relay = LoroStore::new();
        relay.import(&last_update(&session)).unwrap();
        assert_eq!(relay.stroke_ids().unwrap().len(), 1);
        let remote_peer = *remote.version().iter().next().unwrap().0;
        assert!(relay.version().get(&remote_peer).is_none());
    }

    #[test]
    fn test_presence_flow() {
        let mut session = joined_session();
        let engine = DrawingEngine::new();
        let mut bridge = ReconciliationBridge::new();
        bridge
            .sync_presence(&engine, Some(Point::new(3.0, 4.0)), "Ada", session.store().as_ref())
            .unwrap();
        session.flush().unwrap();
        assert!(matches!(
            session.transport().sent.last(),
            Some(ClientMessage::Presence { presence }) if presence.user_name == "Ada"
        ));

        let now = Instant::now();
        session.handle_event(
            SyncEvent::PresenceReceived {
                from: "peer".to_string(),
                presence: Presence {
                    cursor: Some(Point::ZERO),
                    ..Presence::default()
                },
            },
            now,
        );
        assert_eq!(session.store().others().len(), 1);

        // A newcomer gets our presence again.
        session.handle_event(
            SyncEvent::PeerJoined {
                connection_id: "late".to_string(),
            },
            now,
        );
        let before = session.transport().sent.len();
        session.flush().unwrap();
        assert_eq!(session.transport().sent.len(), before + 1);

        session.handle_event(
            SyncEvent::PeerLeft {
                connection_id: "peer".to_string(),
            },
            now,
        );
        assert!(session.store().others().is_empty());
    }

    #[test]
    fn test_disconnect_schedules_reconnect() {
        let mut session = joined_session();
        let now = Instant::now();
        session.handle_event(SyncEvent::Disconnected, now);
        assert_eq!(session.status(), ConnectionStatus::Reconnecting);
        assert!(!session.is_joined());

        // Drawing continues offline; nothing is sent until rejoined.
        session
            .store()
            .put_layers(&[crate::store::LayerRecord {
                id: "l".to_string(),
                name: "L".to_string(),
                visible: true,
                order: 0,
            }])
            .unwrap();
        let sent = session.transport().sent.len();
        session.flush().unwrap();
        assert_eq!(session.transport().sent.len(), sent);

        session.poll(now + Duration::from_millis(10));
        assert_eq!(session.transport().connects, 1);
        session.poll(now + DEFAULT_RECONNECT_DELAY);
        assert_eq!(session.transport().connects, 2);

        session.handle_event(SyncEvent::Connected, now);
        session.handle_event(
            SyncEvent::JoinedRoom {
                room: "room-1".to_string(),
                connection_id: "me-2".to_string(),
                peer_count: 1,
                snapshot: None,
            },
            now,
        );
        session.flush().unwrap();
        let peer = LoroStore::new();
        peer.import(&last_update(&session)).unwrap();
        assert_eq!(peer.layers().unwrap().len(), 1);
    }
}
