//! The 32-byte handshake exchanged unconditionally at the start of every
//! connection, before either side switches to the length-prefixed message
//! protocol.

use crate::PeerId;

/// The fixed 18-byte ASCII magic that opens every handshake.
pub const PROTOCOL_STRING: &str = "P2PFILESHARINGPROJ";

const ZERO_PADDING_LEN: usize = 10;

/// The length, in bytes, of a handshake on the wire.
pub const HANDSHAKE_LEN: usize =
    PROTOCOL_STRING.len() + ZERO_PADDING_LEN + std::mem::size_of::<PeerId>();

/// A decoded handshake.
///
/// The 10 zero padding bytes are never validated on receipt (§4.1) and are
/// not represented here; they are reproduced verbatim on encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    /// Encodes this handshake into its fixed 32-byte wire representation.
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[..PROTOCOL_STRING.len()].copy_from_slice(PROTOCOL_STRING.as_bytes());
        // the 10 zero padding bytes are already zeroed by the array init
        buf[PROTOCOL_STRING.len() + ZERO_PADDING_LEN..]
            .copy_from_slice(&self.peer_id.to_be_bytes());
        buf
    }

    /// Decodes a handshake from exactly [`HANDSHAKE_LEN`] bytes, returning
    /// `None` if the magic string doesn't match.
    ///
    /// Padding bytes are not validated, per §4.1.
    pub fn decode(buf: &[u8; HANDSHAKE_LEN]) -> Option<Self> {
        if &buf[..PROTOCOL_STRING.len()] != PROTOCOL_STRING.as_bytes() {
            return None;
        }
        let id_offset = PROTOCOL_STRING.len() + ZERO_PADDING_LEN;
        let mut id_bytes = [0u8; std::mem::size_of::<PeerId>()];
        id_bytes.copy_from_slice(&buf[id_offset..]);
        Some(Self {
            peer_id: PeerId::from_be_bytes(id_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_any_peer_id() {
        for id in [0u32, 1, 1001, u32::MAX] {
            let encoded = Handshake::new(id).encode();
            let decoded = Handshake::decode(&encoded).unwrap();
            assert_eq!(decoded.peer_id, id);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = Handshake::new(42).encode();
        buf[0] = b'X';
        assert!(Handshake::decode(&buf).is_none());
    }

    #[test]
    fn padding_bytes_are_not_validated() {
        let mut buf = Handshake::new(7).encode();
        // corrupt the zero padding: decode must still succeed
        for b in &mut buf[PROTOCOL_STRING.len()..PROTOCOL_STRING.len() + ZERO_PADDING_LEN] {
            *b = 0xFF;
        }
        let decoded = Handshake::decode(&buf).unwrap();
        assert_eq!(decoded.peer_id, 7);
    }

    #[test]
    fn encoding_is_exactly_32_bytes() {
        assert_eq!(HANDSHAKE_LEN, 32);
        assert_eq!(Handshake::new(1).encode().len(), 32);
    }
}
