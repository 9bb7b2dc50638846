//! Relay wire protocol and the native WebSocket client.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{ConnectionStatus, Presence};

/// Sync client errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room.
    Join { room: String },
    /// Leave the current room.
    Leave,
    /// Loro updates, base64 encoded.
    Update { data: String },
    /// This participant's presence.
    Presence { presence: Presence },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Room joined. `snapshot` carries the merged room document, if any.
    Joined {
        room: String,
        connection_id: String,
        peer_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    PeerJoined { connection_id: String },
    PeerLeft { connection_id: String },
    /// Loro updates from another peer, base64 encoded.
    Update { from: String, data: String },
    Presence { from: String, presence: Presence },
    Error { message: String },
}

/// Decoded events surfaced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    JoinedRoom {
        room: String,
        connection_id: String,
        peer_count: usize,
        snapshot: Option<Vec<u8>>,
    },
    PeerJoined { connection_id: String },
    PeerLeft { connection_id: String },
    UpdateReceived { from: String, data: Vec<u8> },
    PresenceReceived { from: String, presence: Presence },
    Error { message: String },
}

pub fn encode_bytes(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn decode_bytes(data: &str) -> Option<Vec<u8>> {
    BASE64.decode(data).ok()
}

impl ServerMessage {
    /// Convert to an event, decoding binary payloads. Undecodable payloads
    /// yield `None`.
    pub fn into_event(self) -> Option<SyncEvent> {
        let event = match self {
            ServerMessage::Joined {
                room,
                connection_id,
                peer_count,
                snapshot,
            } => SyncEvent::JoinedRoom {
                room,
                connection_id,
                peer_count,
                snapshot: snapshot.and_then(|s| decode_bytes(&s)),
            },
            ServerMessage::PeerJoined { connection_id } => SyncEvent::PeerJoined { connection_id },
            ServerMessage::PeerLeft { connection_id } => SyncEvent::PeerLeft { connection_id },
            ServerMessage::Update { from, data } => SyncEvent::UpdateReceived {
                from,
                data: decode_bytes(&data)?,
            },
            ServerMessage::Presence { from, presence } => SyncEvent::PresenceReceived { from, presence },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        };
        Some(event)
    }
}

/// A message channel to the relay.
pub trait Transport {
    fn connect(&mut self, url: &str) -> Result<(), SyncError>;
    fn disconnect(&mut self);
    /// Queue a text frame.
    fn send(&mut self, msg: &str) -> Result<(), SyncError>;
    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<SyncEvent>;
    fn status(&self) -> ConnectionStatus;
}

mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client running on a background thread.
    ///
    /// The caller never blocks: sends are queued on a channel and events are
    /// collected with [`Transport::poll_events`].
    pub struct NativeWebSocket {
        status: ConnectionStatus,
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<SyncEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                status: ConnectionStatus::Disconnected,
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    /// Outcome of emptying the command queue.
    #[derive(Debug)]
    enum Drain<E> {
        /// Queue empty; number of messages handed to the socket.
        Idle(usize),
        Close,
        /// The owning client was dropped.
        Gone,
        Failed(E),
    }

    /// Hand every queued message to `send`, stopping at close or failure.
    fn drain_commands<E>(cmd_rx: &Receiver<WsCommand>, mut send: impl FnMut(String) -> Result<(), E>) -> Drain<E> {
        let mut sent = 0;
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    if let Err(e) = send(msg) {
                        return Drain::Failed(e);
                    }
                    sent += 1;
                }
                Ok(WsCommand::Close) => return Drain::Close,
                Err(TryRecvError::Disconnected) => return Drain::Gone,
                Err(TryRecvError::Empty) => return Drain::Idle(sent),
            }
        }
    }

    fn run(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<SyncEvent>) {
        log::info!("WebSocket thread: connecting to {}", url);
        let (mut socket, response) = match connect(url.as_str()) {
            Ok(connected) => connected,
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(SyncEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                let _ = event_tx.send(SyncEvent::Disconnected);
                return;
            }
        };
        log::info!("WebSocket connected, status: {}", response.status());
        let _ = event_tx.send(SyncEvent::Connected);

        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            let drained = drain_commands(&cmd_rx, |msg| socket.write(Message::Text(msg)));
            match drained {
                Drain::Idle(0) => {}
                Drain::Idle(n) => log::trace!("Sent {} queued messages", n),
                Drain::Close => {
                    let _ = socket.close(None);
                    break;
                }
                Drain::Gone => break,
                Drain::Failed(e) => {
                    log::error!("WebSocket send error: {}", e);
                    break;
                }
            }
            match socket.flush() {
                Ok(()) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("WebSocket flush error: {}", e);
                    break;
                }
            }

            match socket.read() {
                Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                    Ok(msg) => {
                        if let Some(event) = msg.into_event() {
                            let _ = event_tx.send(event);
                        } else {
                            log::warn!("Dropping server message with undecodable payload");
                        }
                    }
                    Err(e) => log::warn!("Failed to parse server message: {}", e),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    break;
                }
            }
        }

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(SyncEvent::Disconnected);
    }

    impl Transport for NativeWebSocket {
        fn connect(&mut self, url: &str) -> Result<(), SyncError> {
            if self.cmd_tx.is_some() {
                return Err(SyncError::AlreadyConnected);
            }
            let parsed = Url::parse(url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(SyncError::InvalidUrl(format!("scheme {}", parsed.scheme())));
            }

            self.status = ConnectionStatus::Connecting;
            let (cmd_tx, cmd_rx) = channel();
            let (event_tx, event_rx) = channel();
            let url = url.to_string();
            let handle = thread::spawn(move || run(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.status = ConnectionStatus::Disconnected;
        }

        fn send(&mut self, msg: &str) -> Result<(), SyncError> {
            let tx = self.cmd_tx.as_ref().ok_or(SyncError::NotConnected)?;
            tx.send(WsCommand::Send(msg.to_string()))
                .map_err(|e| SyncError::Send(e.to_string()))
        }

        fn poll_events(&mut self) -> Vec<SyncEvent> {
            let mut events = Vec::new();
            let mut finished = false;
            if let Some(rx) = &self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.status = ConnectionStatus::Connected,
                        SyncEvent::Disconnected => finished = true,
                        _ => {}
                    }
                    events.push(event);
                }
            }
            if finished {
                // The worker is gone; allow a fresh connect.
                self.cmd_tx = None;
                self.event_rx = None;
                self._thread = None;
                self.status = ConnectionStatus::Disconnected;
            }
            events
        }

        fn status(&self) -> ConnectionStatus {
            self.status
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_drain_sends_the_whole_queue() {
            let (tx, rx) = channel();
            for i in 0..100 {
                tx.send(WsCommand::Send(format!("m{}", i))).unwrap();
            }
            let mut out = Vec::new();
            let drained = drain_commands(&rx, |msg| {
                out.push(msg);
                Ok::<_, ()>(())
            });
            assert!(matches!(drained, Drain::Idle(100)));
            assert_eq!(out.len(), 100);
            assert_eq!(out[99], "m99");
        }

        #[test]
        fn test_drain_stops_at_close_and_failure() {
            let (tx, rx) = channel();
            tx.send(WsCommand::Send("a".to_string())).unwrap();
            tx.send(WsCommand::Close).unwrap();
            tx.send(WsCommand::Send("b".to_string())).unwrap();
            let mut out = Vec::new();
            let drained = drain_commands(&rx, |msg| {
                out.push(msg);
                Ok::<_, ()>(())
            });
            assert!(matches!(drained, Drain::Close));
            assert_eq!(out, vec!["a".to_string()]);

            let drained = drain_commands(&rx, |_| Err("broken pipe"));
            assert!(matches!(drained, Drain::Failed("broken pipe")));

            drop(tx);
            assert!(matches!(drain_commands(&rx, |_| Ok::<_, ()>(())), Drain::Gone));
        }
    }
}

pub use native_client::NativeWebSocket;
