//! Crate-wide error type.
//!
//! Error categories follow the taxonomy of the protocol this engine
//! implements: configuration errors abort startup before any network
//! activity takes place, while every other variant is confined to the single
//! connection or piece it concerns and never brings down the engine.

use crate::PeerId;

/// The result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `Common.cfg` or `PeerInfo.cfg` entry was missing, malformed, or the
    /// files themselves could not be found. This is always fatal: the
    /// process aborts before any socket is opened.
    #[error("configuration error: {0}")]
    Config(String),

    /// The local peer identifier given on the command line does not appear
    /// in `PeerInfo.cfg`.
    #[error("peer {0} is not listed in the membership configuration")]
    UnknownPeerId(PeerId),

    /// The 32-byte handshake did not carry the expected magic string, or (for
    /// an outbound connection) the peer identifier it carried did not match
    /// the peer we dialed. The connection is dropped; no session is created.
    #[error("handshake with peer {0:?} failed")]
    HandshakeMismatch(Option<PeerId>),

    /// A frame carried a message type byte this engine does not recognize.
    /// Per protocol, such frames are ignored rather than treated as fatal.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// Transport-level I/O failure on a connection. The owning session is
    /// torn down; the rest of the engine is unaffected.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
