//! The termination detector (§4.7): polls local and neighbor completion
//! every 2 seconds and exits the process once every configured peer has the
//! full file.

use std::{sync::Arc, time::Duration};

use crate::{registry::Registry, storage::PieceStore, PeerId};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Runs forever, exiting the process (`std::process::exit(0)`) once every
/// other configured peer is connected and complete.
///
/// Exiting directly from here, rather than returning and letting `main`
/// unwind, mirrors the source design this engine is adapted from, which
/// calls its own process-exit equivalent from inside the detector.
pub(crate) async fn run(
    local_id: PeerId,
    membership_len: usize,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) {
    let expected_neighbors = membership_len.saturating_sub(1);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;

        if !storage.has_all() {
            continue;
        }

        let swarm_complete = registry.with_entries(|entries| {
            entries.len() == expected_neighbors
                && entries.values().all(|e| e.state.neighbor_bitmap.all())
        });

        if swarm_complete {
            log::info!(
                "Peer {} confirms the entire swarm holds the complete file; shutting down.",
                local_id
            );
            for (_, session) in registry.sessions() {
                session.close().await;
            }
            std::process::exit(0);
        }
    }
}
