//! Event types carried by the binary wire protocol.

use std::fmt;

use bytes::Bytes;

use crate::ProtocolError;

// ============================================================================
// Event type
// ============================================================================

/// Wire value of byte 0 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Invalid = 0,
    UnreliableMessageReceived = 1,
    ReliableMessageReceived = 2,
    ServerInitialized = 3,
    ServerInitFailed = 4,
    ServerClosed = 5,
    NewConnection = 6,
    ConnectionFailed = 7,
    Disconnected = 8,
    FatalError = 100,
    Warning = 101,
    Log = 102,
    /// This value and higher are reserved; never user visible.
    ReservedStart = 200,
    MetaVersion = 201,
    MetaHeartbeat = 202,
}

impl EventType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for values in the reserved range (meta-frames and the sentinel).
    pub fn is_reserved(self) -> bool {
        self.as_u8() >= EventType::ReservedStart.as_u8()
    }

    pub fn name(self) -> &'static str {
        match self {
            EventType::Invalid => "Invalid",
            EventType::UnreliableMessageReceived => "UnreliableMessageReceived",
            EventType::ReliableMessageReceived => "ReliableMessageReceived",
            EventType::ServerInitialized => "ServerInitialized",
            EventType::ServerInitFailed => "ServerInitFailed",
            EventType::ServerClosed => "ServerClosed",
            EventType::NewConnection => "NewConnection",
            EventType::ConnectionFailed => "ConnectionFailed",
            EventType::Disconnected => "Disconnected",
            EventType::FatalError => "FatalError",
            EventType::Warning => "Warning",
            EventType::Log => "Log",
            EventType::ReservedStart => "ReservedStart",
            EventType::MetaVersion => "MetaVersion",
            EventType::MetaHeartbeat => "MetaHeartbeat",
        }
    }
}

impl TryFrom<u8> for EventType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let ty = match value {
            0 => EventType::Invalid,
            1 => EventType::UnreliableMessageReceived,
            2 => EventType::ReliableMessageReceived,
            3 => EventType::ServerInitialized,
            4 => EventType::ServerInitFailed,
            5 => EventType::ServerClosed,
            6 => EventType::NewConnection,
            7 => EventType::ConnectionFailed,
            8 => EventType::Disconnected,
            100 => EventType::FatalError,
            101 => EventType::Warning,
            102 => EventType::Log,
            200 => EventType::ReservedStart,
            201 => EventType::MetaVersion,
            202 => EventType::MetaHeartbeat,
            v if v >= 200 => return Err(ProtocolError::UnknownMetaFrame(v)),
            v => return Err(ProtocolError::UnknownEventType(v)),
        };
        Ok(ty)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Connection id
// ============================================================================

/// Identifies one logical link from one session's point of view.
///
/// Both ends of a link pick their own id; the two values are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub i16);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(-1);

    /// First id handed out for incoming links. Clients conventionally pick
    /// outgoing ids from the lower half of the positive range.
    pub const FIRST_INCOMING: ConnectionId = ConnectionId(16384);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl From<i16> for ConnectionId {
    fn from(id: i16) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// UTF-16 text
// ============================================================================

/// Text payload as raw UTF-16 code units.
///
/// Code units are kept verbatim (lone surrogates included) so that text
/// survives a relay hop unchanged. Length is measured in code units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Utf16String(Vec<u16>);

impl Utf16String {
    pub fn from_units(units: Vec<u16>) -> Self {
        Utf16String(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy conversion for logging.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for Utf16String {
    fn from(s: &str) -> Self {
        Utf16String(s.encode_utf16().collect())
    }
}

impl From<String> for Utf16String {
    fn from(s: String) -> Self {
        Utf16String::from(s.as_str())
    }
}

impl fmt::Display for Utf16String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

// ============================================================================
// Network event
// ============================================================================

/// Payload of a [`NetworkEvent`]. Exactly one variant is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventData {
    #[default]
    None,
    Bytes(Bytes),
    Text(Utf16String),
}

impl EventData {
    /// Wire value of byte 1.
    pub fn kind(&self) -> DataKind {
        match self {
            EventData::None => DataKind::None,
            EventData::Bytes(_) => DataKind::Bytes,
            EventData::Text(_) => DataKind::Utf16Text,
        }
    }

    pub fn as_text(&self) -> Option<&Utf16String> {
        match self {
            EventData::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            EventData::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<Utf16String> for EventData {
    fn from(text: Utf16String) -> Self {
        EventData::Text(text)
    }
}

impl From<Bytes> for EventData {
    fn from(bytes: Bytes) -> Self {
        EventData::Bytes(bytes)
    }
}

impl From<Vec<u8>> for EventData {
    fn from(bytes: Vec<u8>) -> Self {
        EventData::Bytes(Bytes::from(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataKind {
    None = 0,
    Bytes = 1,
    Utf16Text = 2,
}

impl TryFrom<u8> for DataKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataKind::None),
            1 => Ok(DataKind::Bytes),
            2 => Ok(DataKind::Utf16Text),
            other => Err(ProtocolError::InvalidDataKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub event_type: EventType,
    pub connection_id: ConnectionId,
    pub data: EventData,
}

impl NetworkEvent {
    pub fn new(event_type: EventType, connection_id: ConnectionId, data: EventData) -> Self {
        Self {
            event_type,
            connection_id,
            data,
        }
    }

    /// Event without payload.
    pub fn empty(event_type: EventType, connection_id: ConnectionId) -> Self {
        Self::new(event_type, connection_id, EventData::None)
    }

    pub fn text(&self) -> Option<&Utf16String> {
        self.data.as_text()
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, id: {}, data: ", self.event_type, self.connection_id)?;
        match &self.data {
            EventData::None => f.write_str("none]"),
            EventData::Text(t) => write!(f, "\"{t}\"]"),
            EventData::Bytes(b) => write!(f, "{} bytes]", b.len()),
        }
    }
}
