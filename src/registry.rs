//! The shared session registry: every subsystem other than a session's own
//! message processor reaches neighbor state through here (§3, §5).
//!
//! A single `std::sync::Mutex` guards the whole map, matching the coarse
//! "registry lock" the protocol's concurrency model calls for, as opposed to
//! cratetorrent's own per-session command-channel design (see DESIGN.md for
//! why a channel-actor model doesn't fit this protocol's "hold the registry
//! lock for a whole scheduling cycle" requirement). Because a
//! `std::sync::MutexGuard` cannot be held across an `.await` inside a
//! `tokio::spawn`ed (i.e. `Send`) future, callers that need to both mutate
//! registry state *and* send on the wire split the work in two: decide and
//! mutate while holding the lock, collect what needs to be sent, release the
//! lock, then send. [`Registry::with_entries`] is the one place that lock is
//! taken; everything else is built on top of it.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use crate::{session::Session, Bitfield, PeerId};

/// The mutable, non-transport state of one neighbor session (§3).
#[derive(Clone, Debug)]
pub struct NeighborState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub neighbor_bitmap: Bitfield,
    pub interval_download_bytes: u64,
    pub is_optimistic: bool,
}

impl NeighborState {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            neighbor_bitmap: Bitfield::repeat(false, num_pieces),
            interval_download_bytes: 0,
            is_optimistic: false,
        }
    }
}

/// One entry in the registry: a neighbor's state plus a handle to its
/// transport, kept together so a caller holding the registry lock can read
/// both without a second lookup.
pub struct Entry {
    pub session: Arc<Session>,
    pub state: NeighborState,
}

/// The shared table of all currently connected neighbor sessions.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<PeerId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a newly connected neighbor, replacing any prior entry under
    /// the same identifier (there should never be one: each peer dials the
    /// other at most once per §4.6).
    pub fn insert(&self, peer_id: PeerId, session: Arc<Session>, state: NeighborState) {
        self.entries
            .lock()
            .unwrap()
            .insert(peer_id, Entry { session, state });
    }

    /// Removes a session, e.g. once its transport has ended.
    pub fn remove(&self, peer_id: PeerId) {
        self.entries.lock().unwrap().remove(&peer_id);
    }

    /// The number of currently connected neighbor sessions.
    pub fn connected_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns a clone of the transport handle for `peer_id`, if connected.
    pub fn session(&self, peer_id: PeerId) -> Option<Arc<Session>> {
        self.entries
            .lock()
            .unwrap()
            .get(&peer_id)
            .map(|e| Arc::clone(&e.session))
    }

    /// Runs `f` with exclusive synchronous access to every entry. `f` must
    /// not `.await` anything (the lock cannot be held across a suspension
    /// point); it returns whatever side information (e.g. who to send to)
    /// the caller needs in order to act after releasing the lock.
    pub fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<PeerId, Entry>) -> R) -> R {
        let mut entries = self.entries.lock().unwrap();
        f(&mut entries)
    }

    /// Runs `f` with mutable access to a single neighbor's state, if present.
    pub fn with_state<R>(&self, peer_id: PeerId, f: impl FnOnce(&mut NeighborState) -> R) -> Option<R> {
        let mut entries = self.entries.lock().unwrap();
        entries.get_mut(&peer_id).map(|e| f(&mut e.state))
    }

    /// Every connected peer id and the `Arc<Session>` handle to send to it;
    /// for broadcasting HAVE after a successful piece write (§4.4).
    pub fn sessions(&self) -> Vec<(PeerId, Arc<Session>)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, e)| (*id, Arc::clone(&e.session)))
            .collect()
    }
}
