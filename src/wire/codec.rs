//! `tokio_util` codecs for the handshake and the message frame.
//!
//! Mirrors the two-codec-then-swap pattern cratetorrent itself uses: a
//! connection starts out framed with [`HandshakeCodec`], and once the
//! handshake completes the `Framed`'s parts (including any bytes already
//! buffered past the handshake) are carried over into a `Framed` wrapping
//! [`MessageCodec`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{
    handshake::{Handshake, HANDSHAKE_LEN},
    message::{Message, MessageId},
};
use crate::{error::Error, Bitfield, PieceIndex};

/// Frames the fixed 32-byte handshake, in either direction.
pub(crate) struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HANDSHAKE_LEN {
            return Ok(None);
        }
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf.copy_from_slice(&src[..HANDSHAKE_LEN]);
        src.advance(HANDSHAKE_LEN);
        Handshake::decode(&buf)
            .map(Some)
            .ok_or(Error::HandshakeMismatch(None))
    }
}

/// Frames the length-prefixed peer protocol messages (§4.1).
pub(crate) struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let id = match item.id() {
            Some(id) => id,
            None => {
                debug_assert!(false, "Message::Unknown is never encoded");
                return Ok(());
            }
        };
        match item {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {
                write_frame_header(dst, 1, id);
            }
            Message::Have(index) => {
                write_frame_header(dst, 1 + 4, id);
                dst.put_u32(index as u32);
            }
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.into_vec();
                write_frame_header(dst, 1 + bytes.len(), id);
                dst.extend_from_slice(&bytes);
            }
            Message::Request(index) => {
                write_frame_header(dst, 1 + 4, id);
                dst.put_u32(index as u32);
            }
            Message::Piece { index, data } => {
                write_frame_header(dst, 1 + 4 + data.len(), id);
                dst.put_u32(index as u32);
                dst.extend_from_slice(&data);
            }
            Message::Unknown => unreachable!(),
        }
        Ok(())
    }
}

fn write_frame_header(dst: &mut BytesMut, body_len: usize, id: MessageId) {
    dst.reserve(4 + body_len);
    dst.put_u32(body_len as u32);
    dst.put_u8(id as u8);
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len == 0 {
            // this system never produces a zero length field; a peer that
            // sends one is ignored rather than disconnected (§7(e))
            src.advance(4);
            return Ok(Some(Message::Unknown));
        }
        if src.len() < 4 + len {
            // not enough data buffered yet for the full frame
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut body = src.split_to(len);
        let type_byte = body.get_u8();
        let id = match MessageId::from_u8(type_byte) {
            Some(id) => id,
            // an unrecognized message type is ignored, not a fatal error
            None => return Ok(Some(Message::Unknown)),
        };
        let payload = body;

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => Message::Have(read_u32(&payload)? as PieceIndex),
            MessageId::Bitfield => Message::Bitfield(Bitfield::from_vec(payload.to_vec())),
            MessageId::Request => Message::Request(read_u32(&payload)? as PieceIndex),
            MessageId::Piece => {
                if payload.len() < 4 {
                    return Err(Error::UnknownMessageType(type_byte));
                }
                let index = read_u32(&payload[..4])? as PieceIndex;
                let data = payload[4..].to_vec();
                Message::Piece { index, data }
            }
        };
        Ok(Some(msg))
    }
}

fn read_u32(buf: &[u8]) -> Result<u32, Error> {
    if buf.len() != 4 {
        return Err(Error::UnknownMessageType(0));
    }
    Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::prelude::*;

    fn round_trip(msg: Message) -> Message {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn round_trips_flag_messages() {
        assert_eq!(round_trip(Message::Choke), Message::Choke);
        assert_eq!(round_trip(Message::Unchoke), Message::Unchoke);
        assert_eq!(round_trip(Message::Interested), Message::Interested);
        assert_eq!(
            round_trip(Message::NotInterested),
            Message::NotInterested
        );
    }

    #[test]
    fn round_trips_have_and_request() {
        assert_eq!(round_trip(Message::Have(42)), Message::Have(42));
        assert_eq!(round_trip(Message::Request(7)), Message::Request(7));
    }

    #[test]
    fn round_trips_piece() {
        let msg = Message::Piece {
            index: 3,
            data: vec![1, 2, 3, 4, 5],
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn round_trips_bitfield() {
        let mut bits: Bitfield = bitvec![Msb0, u8; 0; 16];
        bits.set(0, true);
        bits.set(9, true);
        let msg = Message::Bitfield(bits.clone());
        match round_trip(msg) {
            Message::Bitfield(decoded) => assert_eq!(decoded, bits),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::Have(5), &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn decode_ignores_unknown_type_rather_than_erroring() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(200);
        let mut codec = MessageCodec;
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Unknown));
    }

    #[test]
    fn decode_ignores_zero_length_frame_rather_than_erroring() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        let mut codec = MessageCodec;
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Unknown));
    }
}
