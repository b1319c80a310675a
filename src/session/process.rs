//! The per-session message processor: the state machine of §4.4, run as one
//! `tokio::spawn`ed task per connected neighbor, consuming frames off that
//! neighbor's receive half.

use std::sync::Arc;

use futures::{stream::SplitStream, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::{
    error::Result,
    registry::Registry,
    storage::PieceStore,
    wire::{Message, MessageCodec},
    PeerId, PieceIndex,
};

use super::Session;

/// Drives one neighbor's session until its transport ends.
///
/// On return the session has already been removed from `registry` and its
/// transport closed; the caller (the task spawned by `net`) has nothing left
/// to clean up.
pub(crate) async fn run(
    local_id: PeerId,
    peer_id: PeerId,
    mut stream: SplitStream<Framed<TcpStream, MessageCodec>>,
    session: Arc<Session>,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                if let Err(e) =
                    handle_message(local_id, peer_id, msg, &session, &registry, &storage).await
                {
                    log::warn!(
                        "Peer {} session with {} ended with an error: {}",
                        local_id,
                        peer_id,
                        e
                    );
                    break;
                }
            }
            Some(Err(e)) => {
                log::warn!("Peer {} lost connection to {}: {}", local_id, peer_id, e);
                break;
            }
            None => {
                log::debug!("Peer {} connection to {} closed", local_id, peer_id);
                break;
            }
        }
    }
    registry.remove(peer_id);
    session.close().await;
}

async fn handle_message(
    local_id: PeerId,
    peer_id: PeerId,
    msg: Message,
    session: &Arc<Session>,
    registry: &Arc<Registry>,
    storage: &Arc<PieceStore>,
) -> Result<()> {
    match msg {
        Message::Bitfield(mut bits) => {
            bits.resize(storage.num_pieces(), false);
            let interesting = has_interesting_piece(&bits, storage);
            registry.with_state(peer_id, |s| {
                s.neighbor_bitmap = bits;
                s.am_interested = interesting;
            });
            if interesting {
                session.send(Message::Interested).await?;
            } else {
                session.send(Message::NotInterested).await?;
            }
        }
        Message::Have(index) => {
            log::info!(
                "Peer {} received the 'have' message from {} for the piece {}.",
                local_id,
                peer_id,
                index
            );
            let newly_interested = registry
                .with_state(peer_id, |s| {
                    if index < s.neighbor_bitmap.len() {
                        s.neighbor_bitmap.set(index, true);
                    }
                    if !s.am_interested && !storage.has(index) {
                        s.am_interested = true;
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if newly_interested {
                session.send(Message::Interested).await?;
            }
        }
        Message::Interested => {
            log::info!(
                "Peer {} received the 'interested' message from {}.",
                local_id,
                peer_id
            );
            registry.with_state(peer_id, |s| s.peer_interested = true);
        }
        Message::NotInterested => {
            log::info!(
                "Peer {} received the 'not interested' message from {}.",
                local_id,
                peer_id
            );
            registry.with_state(peer_id, |s| s.peer_interested = false);
        }
        Message::Choke => {
            log::info!("Peer {} is choked by {}.", local_id, peer_id);
            registry.with_state(peer_id, |s| s.peer_choking = true);
        }
        Message::Unchoke => {
            log::info!("Peer {} is unchoked by {}.", local_id, peer_id);
            registry.with_state(peer_id, |s| s.peer_choking = false);
            try_request(peer_id, session, registry, storage).await?;
        }
        Message::Request(index) => {
            let am_choking = registry.with_state(peer_id, |s| s.am_choking).unwrap_or(true);
            if am_choking {
                log::debug!(
                    "Peer {} dropped request for piece {} from choked peer {}",
                    local_id,
                    index,
                    peer_id
                );
            } else if let Some(data) = storage.read(index)? {
                let len = data.len() as u64;
                session.send(Message::Piece { index, data }).await?;
                registry.with_state(peer_id, |s| s.interval_download_bytes += len);
            }
        }
        Message::Piece { index, data } => {
            registry.with_state(peer_id, |s| s.interval_download_bytes += data.len() as u64);
            if storage.write(index, &data) {
                log::info!(
                    "Peer {} has downloaded the piece {} from {}. Now the number of pieces it has is {}.",
                    local_id,
                    index,
                    peer_id,
                    storage.count_owned()
                );
                broadcast_have(local_id, index, registry, storage).await;
                if storage.has_all() {
                    log::info!("Peer {} has downloaded the complete file.", local_id);
                }
                let still_unchoked = registry.with_state(peer_id, |s| !s.peer_choking).unwrap_or(false);
                if still_unchoked {
                    try_request(peer_id, session, registry, storage).await?;
                }
            }
        }
        Message::Unknown => {
            log::debug!(
                "Peer {} ignored an unrecognized frame from {}",
                local_id,
                peer_id
            );
        }
    }
    Ok(())
}

fn has_interesting_piece(bitmap: &crate::Bitfield, storage: &PieceStore) -> bool {
    (0..storage.num_pieces()).any(|i| i < bitmap.len() && bitmap[i] && !storage.has(i))
}

fn candidate_pieces(bitmap: &crate::Bitfield, storage: &PieceStore) -> Vec<PieceIndex> {
    (0..storage.num_pieces())
        .filter(|&i| i < bitmap.len() && bitmap[i] && !storage.has(i))
        .collect()
}

/// Attempts to request one more piece on this session, if unchoked,
/// interested, and some neighbor-held piece remains unrequested (§4.4's
/// request selection rule).
async fn try_request(
    peer_id: PeerId,
    session: &Arc<Session>,
    registry: &Arc<Registry>,
    storage: &Arc<PieceStore>,
) -> Result<()> {
    let candidates = registry.with_state(peer_id, |s| {
        if s.peer_choking || !s.am_interested {
            None
        } else {
            Some(candidate_pieces(&s.neighbor_bitmap, storage))
        }
    });
    let candidates = match candidates.flatten() {
        Some(candidates) if !candidates.is_empty() => candidates,
        _ => return Ok(()),
    };
    if let Some(index) = storage.claim_request(&candidates) {
        session.send(Message::Request(index)).await?;
    }
    Ok(())
}

/// Sends HAVE(index) to every currently connected neighbor, and clears
/// `am_interested` (with a NOT_INTERESTED) on any session that no longer has
/// a piece we lack, per §4.4's PIECE handler.
async fn broadcast_have(
    local_id: PeerId,
    index: PieceIndex,
    registry: &Arc<Registry>,
    storage: &Arc<PieceStore>,
) {
    for (other_id, other_session) in registry.sessions() {
        if other_session.send(Message::Have(index)).await.is_err() {
            log::debug!(
                "Peer {} failed to broadcast 'have' for piece {} to {}",
                local_id,
                index,
                other_id
            );
            continue;
        }
        let should_clear = registry
            .with_state(other_id, |s| {
                if s.am_interested && !has_interesting_piece(&s.neighbor_bitmap, storage) {
                    s.am_interested = false;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if should_clear {
            let _ = other_session.send(Message::NotInterested).await;
        }
    }
}
