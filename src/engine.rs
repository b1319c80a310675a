//! Ties together the piece store, the listener/dialer, both scheduler
//! tasks, and the termination detector for one running peer process.
//!
//! This is the Rust-native equivalent of `peerProcess.py`'s top-level
//! orchestration, split out from `bin/peer_process.rs` so the CLI entry
//! point stays a thin wrapper around argument parsing and this function.

use std::sync::Arc;

use crate::{
    conf::Config, error::Result, net, registry::Registry, scheduler, storage::PieceStore,
    terminator,
};

/// Runs one peer process to completion.
///
/// Returns only on a configuration or startup I/O error; an orderly
/// shutdown instead exits the process from within the termination detector
/// (§4.7), so under normal operation this function never returns `Ok`.
pub async fn run(config: Config) -> Result<()> {
    let local_id = config.local.peer_id;
    let membership_len = config.membership.len();
    let config = Arc::new(config);

    let peer_dir = config.peer_dir();
    std::fs::create_dir_all(&peer_dir)?;
    let file_path = peer_dir.join(&config.common.file_name);

    let storage = Arc::new(PieceStore::open(
        file_path,
        config.common.num_pieces(),
        config.common.piece_size,
        config.common.file_size,
        config.local.has_file_initially,
    )?);

    let registry = Arc::new(Registry::new());

    net::start(
        local_id,
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&storage),
    )
    .await?;

    tokio::spawn(scheduler::run_preferred_neighbor_cycle(
        local_id,
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&storage),
    ));
    tokio::spawn(scheduler::run_optimistic_unchoke_cycle(
        local_id,
        Arc::clone(&config),
        Arc::clone(&registry),
    ));

    terminator::run(local_id, membership_len, registry, storage).await;

    Ok(())
}
