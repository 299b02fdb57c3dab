//! Binary frame codec.
//!
//! Event frame layout (little-endian):
//!   byte 0     event type
//!   byte 1     data kind (0 none, 1 bytes, 2 UTF-16 text)
//!   bytes 2-3  connection id (i16)
//!   bytes 4-7  payload length (u32): byte count, or code unit count for text
//!   bytes 8..  payload
//! A frame with data kind 0 is exactly 4 bytes.
//!
//! Meta-frames: version `[201, version]`, heartbeat `[202]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::event::{ConnectionId, DataKind, EventData, EventType, NetworkEvent, Utf16String};
use crate::{ProtocolError, MAX_PAYLOAD_LEN};

/// Header size without a payload.
const HEADER_SIZE: usize = 4;

/// Header size including the length field.
const HEADER_WITH_LENGTH_SIZE: usize = 8;

static HEARTBEAT_FRAME: [u8; 1] = [EventType::MetaHeartbeat as u8];

/// A decoded frame: either a meta-frame or a full event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Version(u8),
    Heartbeat,
    Event(NetworkEvent),
}

impl From<NetworkEvent> for Frame {
    fn from(evt: NetworkEvent) -> Self {
        Frame::Event(evt)
    }
}

/// Encode a full event frame. The data kind follows the payload variant.
pub fn encode_event(evt: &NetworkEvent) -> Result<Bytes, ProtocolError> {
    let payload_len = match &evt.data {
        EventData::None => 0,
        EventData::Bytes(b) => b.len(),
        EventData::Text(t) => t.len(),
    };
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::MessageTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    let capacity = match &evt.data {
        EventData::None => HEADER_SIZE,
        EventData::Bytes(b) => HEADER_WITH_LENGTH_SIZE + b.len(),
        EventData::Text(t) => HEADER_WITH_LENGTH_SIZE + t.len() * 2,
    };
    let mut buf = BytesMut::with_capacity(capacity);
    buf.put_u8(evt.event_type.as_u8());
    buf.put_u8(evt.data.kind() as u8);
    buf.put_i16_le(evt.connection_id.0);

    match &evt.data {
        EventData::None => {}
        EventData::Bytes(b) => {
            buf.put_u32_le(payload_len as u32);
            buf.extend_from_slice(b);
        }
        EventData::Text(t) => {
            buf.put_u32_le(payload_len as u32);
            for unit in t.units() {
                buf.put_u16_le(*unit);
            }
        }
    }
    Ok(buf.freeze())
}

/// Encode any frame, meta-frames included.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, ProtocolError> {
    match frame {
        Frame::Version(v) => Ok(Bytes::copy_from_slice(&[
            EventType::MetaVersion.as_u8(),
            *v,
        ])),
        Frame::Heartbeat => Ok(Bytes::from_static(&HEARTBEAT_FRAME)),
        Frame::Event(evt) => encode_event(evt),
    }
}

/// Decode one frame. Meta-frames are recognised by byte 0 before the event
/// envelope is parsed. Trailing bytes after a complete frame are ignored.
pub fn decode_frame(src: &[u8]) -> Result<Frame, ProtocolError> {
    let Some(&first) = src.first() else {
        return Err(ProtocolError::Truncated { needed: 1, got: 0 });
    };

    if first == EventType::MetaVersion.as_u8() {
        return match src.get(1) {
            Some(v) => Ok(Frame::Version(*v)),
            None => Err(ProtocolError::Truncated {
                needed: 2,
                got: src.len(),
            }),
        };
    }
    if first == EventType::MetaHeartbeat.as_u8() {
        return Ok(Frame::Heartbeat);
    }
    if first >= EventType::ReservedStart.as_u8() {
        return Err(ProtocolError::UnknownMetaFrame(first));
    }

    decode_event(src).map(Frame::Event)
}

/// Decode a full event frame (no meta-frame handling).
pub fn decode_event(src: &[u8]) -> Result<NetworkEvent, ProtocolError> {
    if src.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            needed: HEADER_SIZE,
            got: src.len(),
        });
    }

    let mut buf = src;
    let event_type = EventType::try_from(buf.get_u8())?;
    let kind = DataKind::try_from(buf.get_u8())?;
    let connection_id = ConnectionId(buf.get_i16_le());

    let data = match kind {
        DataKind::None => EventData::None,
        DataKind::Bytes | DataKind::Utf16Text => {
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated {
                    needed: HEADER_WITH_LENGTH_SIZE,
                    got: src.len(),
                });
            }
            let len = buf.get_u32_le() as usize;
            let unit_size = if kind == DataKind::Bytes { 1 } else { 2 };
            let needed = len
                .checked_mul(unit_size)
                .and_then(|n| n.checked_add(HEADER_WITH_LENGTH_SIZE))
                .ok_or(ProtocolError::MessageTooLarge {
                    size: len,
                    max: MAX_PAYLOAD_LEN,
                })?;
            if src.len() < needed {
                return Err(ProtocolError::Truncated {
                    needed,
                    got: src.len(),
                });
            }

            if kind == DataKind::Bytes {
                EventData::Bytes(Bytes::copy_from_slice(&buf[..len]))
            } else {
                let units = (0..len).map(|_| buf.get_u16_le()).collect();
                EventData::Text(Utf16String::from_units(units))
            }
        }
    };

    Ok(NetworkEvent {
        event_type,
        connection_id,
        data,
    })
}
