//! Rendezvous Protocol -- wire types and binary event codec.
//!
//! One frame per transport message. Multi-byte fields are little-endian.
//! Two meta-frames (version handshake, heartbeat) bypass the event envelope.

pub mod codec;
pub mod event;

pub use codec::{decode_frame, encode_event, encode_frame, Frame};
pub use event::*;

/// Version of the signaling protocol implemented here.
pub const PROTOCOL_VERSION: u8 = 2;

/// Minimum protocol version still supported.
///
/// Version 1 peers do not understand version or heartbeat frames; they log
/// the unknown leading byte and carry on.
pub const PROTOCOL_VERSION_MIN: u8 = 1;

/// Version assumed for a remote peer until it announces one.
pub const DEFAULT_REMOTE_VERSION: u8 = 1;

/// Maximum payload length representable in the u32 length field.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid data kind: {0}")]
    InvalidDataKind(u8),
    #[error("truncated frame: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unknown meta frame: {0}")]
    UnknownMetaFrame(u8),
    #[error("unknown event type: {0}")]
    UnknownEventType(u8),
    #[error("payload too large: {size} units (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}
