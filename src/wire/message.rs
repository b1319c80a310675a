//! The peer protocol's message set (§4.1): eight message types, sharing a
//! single length-prefixed frame. Encoding/decoding to and from that frame is
//! the job of [`super::codec::MessageCodec`]; this module only defines the
//! logical [`Message`] values.

use crate::{Bitfield, PieceIndex};

/// The one-byte type tag that precedes every message's payload on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl MessageId {
    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Piece,
            _ => return None,
        })
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A single decoded protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(PieceIndex),
    Bitfield(Bitfield),
    Request(PieceIndex),
    Piece { index: PieceIndex, data: Vec<u8> },
    /// A frame with a zero length or an unrecognized type byte (§7(e)):
    /// never produced by `encode`, only by `decode`, and always ignored by
    /// the message processor rather than treated as an error.
    Unknown,
}

impl Message {
    /// The message type tag for this value. `Unknown` has no wire
    /// representation and is never passed to the encoder.
    pub fn id(&self) -> Option<MessageId> {
        Some(match self {
            Self::Choke => MessageId::Choke,
            Self::Unchoke => MessageId::Unchoke,
            Self::Interested => MessageId::Interested,
            Self::NotInterested => MessageId::NotInterested,
            Self::Have(_) => MessageId::Have,
            Self::Bitfield(_) => MessageId::Bitfield,
            Self::Request(_) => MessageId::Request,
            Self::Piece { .. } => MessageId::Piece,
            Self::Unknown => return None,
        })
    }
}
