//! Wire framing: the fixed handshake, the length-prefixed message frame, and
//! the `tokio_util` codecs that translate between them and [`Message`]
//! values.

mod codec;
mod handshake;
mod message;

pub(crate) use codec::{HandshakeCodec, MessageCodec};
pub use handshake::{Handshake, PROTOCOL_STRING};
pub use message::{Message, MessageId};
