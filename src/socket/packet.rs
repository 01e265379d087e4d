// Engine.IO v4 / Socket.IO v5 text framing
// Only the text encoding is handled; binary attachments are rejected.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Default Socket.IO namespace
pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type: {0:?}")]
    UnknownType(char),

    #[error("Invalid JSON in packet: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Malformed event packet: {0}")]
    MalformedEvent(String),

    #[error("Unsupported packet: {0}")]
    Unsupported(&'static str),
}

/// Payload of the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Transport-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    /// Carries an encoded [`SocketPacket`]
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let kind = frame.chars().next().ok_or(PacketError::Empty)?;
        let body = &frame[kind.len_utf8()..];
        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(PacketError::Unsupported("base64 binary frame")),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    /// Encode a client-originated packet. `Open` is server-only and encodes as a bare `0`.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(body) => format!("4{}", body),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Application-level packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn decode(body: &str) -> Result<Self, PacketError> {
        let kind = body.chars().next().ok_or(PacketError::Empty)?;
        let mut rest = &body[kind.len_utf8()..];

        if kind == '5' || kind == '6' {
            return Err(PacketError::Unsupported("binary attachment"));
        }

        let mut namespace = DEFAULT_NAMESPACE;
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    namespace = &rest[..comma];
                    rest = &rest[comma + 1..];
                }
                None => {
                    namespace = rest;
                    rest = "";
                }
            }
        }
        let namespace = namespace.to_string();

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(items)) => items,
                    other => return Err(PacketError::MalformedEvent(format!("expected array, got {:?}", other))),
                };
                if args.is_empty() {
                    return Err(PacketError::MalformedEvent("missing event name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => return Err(PacketError::MalformedEvent(format!("event name is not a string: {}", other))),
                };
                Ok(SocketPacket::Event { namespace, id, name, args })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::MalformedEvent("ack without id".to_string()))?;
                let args = match data {
                    Some(Value::Array(items)) => items,
                    None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(SocketPacket::Ack { namespace, id, args })
            }
            '4' => Ok(SocketPacket::ConnectError { namespace, data }),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        fn prefix(kind: char, namespace: &str) -> String {
            if namespace == DEFAULT_NAMESPACE {
                kind.to_string()
            } else {
                format!("{}{},", kind, namespace)
            }
        }

        match self {
            SocketPacket::Connect { namespace, data } => {
                let mut out = prefix('0', namespace);
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
            SocketPacket::Disconnect { namespace } => prefix('1', namespace),
            SocketPacket::Event { namespace, id, name, args } => {
                let mut out = prefix('2', namespace);
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                out.push_str(&Value::Array(items).to_string());
                out
            }
            SocketPacket::Ack { namespace, id, args } => {
                let mut out = prefix('3', namespace);
                out.push_str(&id.to_string());
                out.push_str(&Value::Array(args.clone()).to_string());
                out
            }
            SocketPacket::ConnectError { namespace, data } => {
                let mut out = prefix('4', namespace);
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
        }
    }
}
