// Real-time transport for the chat backend
// Socket.IO over a WebSocket, with per-event listener registration.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::presence::{PresenceTracker, ONLINE_USERS_EVENT};

pub mod packet;

use packet::{EnginePacket, SocketPacket, DEFAULT_NAMESPACE};

/// Something that delivers named events, one listener per event name.
pub trait EventSource: Send + Sync {
    /// Register the listener for `event`. A previous listener for the same
    /// name is replaced and its receiver sees the channel close.
    fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value>;

    /// Drop the listener for `event`, if any
    fn off(&self, event: &str);
}

/// In-process listener table. The socket client dispatches into one of these;
/// it can also be driven directly.
#[derive(Debug, Default)]
pub struct EventRegistry {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to the listener for `event`. Returns whether a live listener took it.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = listeners.get(event) else {
            return false;
        };
        if tx.send(payload).is_err() {
            debug!("Listener for '{}' went away, removing it", event);
            listeners.remove(event);
            return false;
        }
        true
    }

    pub fn has_listener(&self, event: &str) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(false, |tx| !tx.is_closed())
    }
}

impl EventSource for EventRegistry {
    fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.to_string(), tx);
        if previous.is_some() {
            debug!("Replaced existing listener for '{}'", event);
        }
        rx
    }

    fn off(&self, event: &str) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event);
    }
}

enum Outgoing {
    Frame(String),
    Close,
}

/// Connected Socket.IO client
pub struct SocketClient {
    events: Arc<EventRegistry>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SocketClient {
    /// WebSocket endpoint for `server_url`, identifying the session by `user_id`
    pub fn endpoint(server_url: &str, user_id: &str) -> Result<Url> {
        let mut url = Url::parse(server_url).with_context(|| format!("Invalid server URL '{}'", server_url))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(anyhow!("Unsupported scheme '{}' in server URL", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("Cannot switch '{}' to {}", server_url, scheme))?;
        url.set_path("/socket.io/");
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket")
            .append_pair("userId", user_id);
        Ok(url)
    }

    /// Open the connection and start dispatching events. `getOnlineUsers`
    /// broadcasts also update `presence`.
    pub async fn connect(server_url: &str, user_id: &str, presence: PresenceTracker) -> Result<Self> {
        let url = Self::endpoint(server_url, user_id)?;
        info!("Connecting to real-time endpoint {}", url);

        let (ws, _response) = tokio::time::timeout(Duration::from_secs(10), connect_async(url.as_str()))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", url))?
            .with_context(|| format!("Failed to connect websocket: {}", url))?;

        let events = Arc::new(EventRegistry::new());
        let connected = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_session(
            ws,
            out_tx.clone(),
            out_rx,
            events.clone(),
            connected.clone(),
            presence,
        ));

        Ok(SocketClient {
            events,
            outgoing: out_tx,
            connected,
            task,
        })
    }

    /// Listener table fed by this connection
    pub fn events(&self) -> Arc<EventRegistry> {
        self.events.clone()
    }

    /// Whether the Socket.IO namespace handshake has completed and the session is still up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Leave the namespace and close the WebSocket
    pub async fn disconnect(self) {
        if self.outgoing.send(Outgoing::Close).is_err() {
            debug!("Socket session already finished");
        }
        if tokio::time::timeout(Duration::from_secs(2), self.task).await.is_err() {
            warn!("Socket session did not shut down in time");
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_session(
    ws: WsStream,
    out_tx: mpsc::UnboundedSender<Outgoing>,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    events: Arc<EventRegistry>,
    connected: Arc<AtomicBool>,
    presence: PresenceTracker,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if !handle_frame(text.as_str(), &out_tx, &events, &connected, &presence) {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("Server closed the socket: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Socket receive failed: {}", e);
                    break;
                }
                None => {
                    info!("Socket stream ended");
                    break;
                }
            },
            outgoing = out_rx.recv() => match outgoing {
                Some(Outgoing::Frame(frame)) => {
                    if let Err(e) = sink.send(WsMessage::text(frame)).await {
                        error!("Socket send failed: {}", e);
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let leave = EnginePacket::Message(SocketPacket::Disconnect {
                        namespace: DEFAULT_NAMESPACE.to_string(),
                    }.encode());
                    if let Err(e) = sink.send(WsMessage::text(leave.encode())).await {
                        debug!("Failed to send namespace disconnect: {}", e);
                    }
                    if let Err(e) = sink.close().await {
                        debug!("Failed to close socket cleanly: {}", e);
                    }
                    break;
                }
            },
        }
    }

    connected.store(false, Ordering::SeqCst);
    presence.clear();
    info!("Socket session finished");
}

/// Handle one text frame. Returns false when the session should end.
fn handle_frame(
    frame: &str,
    out_tx: &mpsc::UnboundedSender<Outgoing>,
    events: &EventRegistry,
    connected: &AtomicBool,
    presence: &PresenceTracker,
) -> bool {
    let send = |packet: EnginePacket| {
        if out_tx.send(Outgoing::Frame(packet.encode())).is_err() {
            debug!("Outgoing queue closed");
        }
    };

    match EnginePacket::decode(frame) {
        Ok(EnginePacket::Open(handshake)) => {
            info!(
                "Engine.IO session {} opened (ping every {}ms)",
                handshake.sid, handshake.ping_interval
            );
            send(EnginePacket::Message(SocketPacket::connect().encode()));
        }
        Ok(EnginePacket::Ping) => send(EnginePacket::Pong),
        Ok(EnginePacket::Close) => {
            info!("Engine.IO session closed by server");
            return false;
        }
        Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
            Ok(SocketPacket::Connect { namespace, .. }) => {
                info!("Joined Socket.IO namespace {}", namespace);
                connected.store(true, Ordering::SeqCst);
            }
            Ok(SocketPacket::Event { name, mut args, .. }) => {
                let payload = if args.len() == 1 { args.remove(0) } else { Value::Array(args) };
                if name == ONLINE_USERS_EVENT {
                    if let Err(e) = presence.apply_payload(&payload) {
                        warn!("Ignoring malformed {} payload: {}", ONLINE_USERS_EVENT, e);
                    }
                }
                if !events.emit(&name, payload) {
                    debug!("No listener for socket event '{}'", name);
                }
            }
            Ok(SocketPacket::ConnectError { data, .. }) => {
                error!("Socket.IO connection refused: {:?}", data);
                return false;
            }
            Ok(SocketPacket::Disconnect { namespace }) => {
                info!("Server disconnected us from namespace {}", namespace);
                return false;
            }
            Ok(other) => debug!("Ignoring socket packet {:?}", other),
            Err(e) => warn!("Dropping undecodable socket packet: {}", e),
        },
        Ok(other) => debug!("Ignoring engine packet {:?}", other),
        Err(e) => warn!("Dropping undecodable engine frame: {}", e),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_from_http_url() {
        let url = SocketClient::endpoint("http://localhost:5001", "u-1").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5001/socket.io/?EIO=4&transport=websocket&userId=u-1");

        let url = SocketClient::endpoint("https://chat.example.com/", "abc").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert!(SocketClient::endpoint("ftp://example.com", "abc").is_err());
    }

    #[test]
    fn test_registry_replaces_listener() {
        let registry = EventRegistry::new();
        let mut first = registry.on("newMessage");
        let mut second = registry.on("newMessage");

        assert!(registry.emit("newMessage", json!(1)));
        assert_eq!(second.try_recv().unwrap(), json!(1));
        // The replaced receiver is closed, not fed.
        assert!(matches!(first.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));

        registry.off("newMessage");
        assert!(!registry.has_listener("newMessage"));
        assert!(!registry.emit("newMessage", json!(2)));
    }

    #[test]
    fn test_registry_drops_dead_listener() {
        let registry = EventRegistry::new();
        let rx = registry.on("newMessage");
        drop(rx);
        assert!(!registry.has_listener("newMessage"));
        assert!(!registry.emit("newMessage", json!({})));
    }

    #[test]
    fn test_handle_frame_answers_ping_and_joins_namespace() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let registry = EventRegistry::new();
        let connected = AtomicBool::new(false);
        let presence = PresenceTracker::new();

        let open = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
        assert!(handle_frame(open, &out_tx, &registry, &connected, &presence));
        match out_rx.try_recv().unwrap() {
            Outgoing::Frame(frame) => assert_eq!(frame, "40"),
            Outgoing::Close => panic!("Unexpected close"),
        }

        assert!(handle_frame("40{\"sid\":\"x\"}", &out_tx, &registry, &connected, &presence));
        assert!(connected.load(Ordering::SeqCst));

        assert!(handle_frame("2", &out_tx, &registry, &connected, &presence));
        match out_rx.try_recv().unwrap() {
            Outgoing::Frame(frame) => assert_eq!(frame, "3"),
            Outgoing::Close => panic!("Unexpected close"),
        }

        assert!(!handle_frame("1", &out_tx, &registry, &connected, &presence));
    }

    #[test]
    fn test_handle_frame_dispatches_events() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let registry = EventRegistry::new();
        let connected = AtomicBool::new(true);
        let presence = PresenceTracker::new();
        let mut messages = registry.on("newMessage");

        assert!(handle_frame(r#"42["getOnlineUsers",["a","b"]]"#, &out_tx, &registry, &connected, &presence));
        assert!(presence.is_online("a"));
        assert!(presence.is_online("b"));

        assert!(handle_frame(r#"42["newMessage",{"senderId":"a"}]"#, &out_tx, &registry, &connected, &presence));
        assert_eq!(messages.try_recv().unwrap()["senderId"], "a");

        // Garbage is logged and skipped, the session continues.
        assert!(handle_frame("42not json", &out_tx, &registry, &connected, &presence));
        assert!(!handle_frame(r#"44{"message":"nope"}"#, &out_tx, &registry, &connected, &presence));
    }
}
