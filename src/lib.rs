pub mod conf;
pub mod engine;
pub mod error;
#[cfg(test)]
mod integration_tests;
pub mod logging;
mod net;
mod registry;
mod scheduler;
pub mod session;
pub mod storage;
mod terminator;
pub mod wire;

use bitvec::prelude::{BitVec, Msb0};

/// The type of a piece's index.
///
/// On the wire piece indices are sent as 4-byte big endian integers, but in
/// the source code we use `usize` to be consistent with other index types in
/// Rust.
pub type PieceIndex = usize;

/// A peer's numeric identifier, unique across the membership list.
///
/// Ordering of identifiers within the membership list defines which peers
/// this peer dials on startup: see [`conf::Membership`].
pub type PeerId = u32;

/// The piece availability bitmap of a peer.
///
/// It is a compact bool vector ordered from most significant to least
/// significant bits, that is, the first (highest) bit of the first byte
/// represents piece 0, the second highest bit piece 1, and so on (e.g.
/// `0b1100_0001` would mean the peer has pieces 0, 1, and 7). A truthy value
/// at a piece's position means the peer has the piece.
pub type Bitfield = BitVec<Msb0, u8>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_is_msb0_ordered() {
        let mut b: Bitfield = BitVec::repeat(false, 16);
        b.set(0, true);
        b.set(9, true);
        assert!(b[0]);
        assert!(b[9]);
        assert!(!b[1]);
    }
}
