//! The listener and dialer (§4.6): accepts inbound connections and opens
//! outbound ones to every predecessor in membership order, performs the
//! handshake on each, and installs the result as a neighbor session.
//!
//! Mirrors cratetorrent's own `peer.rs` handshake-then-swap-codec sequence
//! (`Framed::into_parts`/`FramedParts::from_parts` carrying over any bytes
//! buffered past the handshake), generalized from a single outbound-only
//! session to both connection directions.

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    conf::Config,
    error::{Error, Result},
    registry::{NeighborState, Registry},
    session::{self, Session},
    storage::PieceStore,
    wire::{Handshake, HandshakeCodec, Message, MessageCodec},
    PeerId,
};

/// Starts the listener and every outbound dial this peer is responsible
/// for, returning once the listener is bound (outbound dials and the accept
/// loop continue to run in the background).
pub(crate) async fn start(
    local_id: PeerId,
    config: Arc<Config>,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) -> Result<()> {
    let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.local.port)
        .parse()
        .map_err(|_| Error::Config(format!("invalid port {}", config.local.port)))?;
    let listener = TcpListener::bind(bind_addr).await?;

    tokio::spawn(accept_loop(
        listener,
        local_id,
        Arc::clone(&registry),
        Arc::clone(&storage),
    ));

    for peer in config.membership.predecessors_of(local_id) {
        let addr = format!("{}:{}", peer.host, peer.port);
        tokio::spawn(dial(
            peer.peer_id,
            addr,
            local_id,
            Arc::clone(&registry),
            Arc::clone(&storage),
        ));
    }

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    local_id: PeerId,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("Peer {} accept failed: {}", local_id, e);
                continue;
            }
        };
        let registry = Arc::clone(&registry);
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            if let Err(e) = accept_one(stream, addr, local_id, registry, storage).await {
                log::warn!(
                    "Peer {} inbound handshake from {} failed: {}",
                    local_id,
                    addr,
                    e
                );
            }
        });
    }
}

async fn accept_one(
    stream: TcpStream,
    addr: SocketAddr,
    local_id: PeerId,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) -> Result<()> {
    let (peer_id, framed) = exchange_handshake(stream, local_id, None).await?;
    log::info!("Peer {} is connected from Peer {}.", local_id, peer_id);
    register_session(peer_id, addr, framed, local_id, registry, storage).await
}

async fn dial(
    peer_id: PeerId,
    addr: String,
    local_id: PeerId,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) {
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!(
                "Peer {} failed to connect to peer {} at {}: {}",
                local_id,
                peer_id,
                addr,
                e
            );
            return;
        }
    };
    let socket_addr = stream
        .peer_addr()
        .unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());

    let framed = match exchange_handshake(stream, local_id, Some(peer_id)).await {
        Ok((_, framed)) => framed,
        Err(e) => {
            log::warn!(
                "Peer {} handshake with peer {} failed: {}",
                local_id,
                peer_id,
                e
            );
            return;
        }
    };

    log::info!("Peer {} makes a connection to Peer {}.", local_id, peer_id);
    if let Err(e) = register_session(peer_id, socket_addr, framed, local_id, registry, storage).await {
        log::warn!(
            "Peer {} could not register session with peer {}: {}",
            local_id,
            peer_id,
            e
        );
    }
}

/// Exchanges the fixed 32-byte handshake on a freshly connected socket, in
/// either direction.
///
/// `expect` is `Some(id)` for an outbound connection, where the identifier
/// the remote side sends back must match the peer we dialed; it is `None`
/// for an inbound connection, where any well-formed peer identifier is
/// accepted.
async fn exchange_handshake(
    stream: TcpStream,
    local_id: PeerId,
    expect: Option<PeerId>,
) -> Result<(PeerId, Framed<TcpStream, MessageCodec>)> {
    let mut framed = Framed::new(stream, HandshakeCodec);
    framed.send(Handshake::new(local_id)).await?;

    let handshake = match framed.next().await {
        Some(handshake) => handshake?,
        None => return Err(Error::HandshakeMismatch(expect)),
    };

    if let Some(expected) = expect {
        if handshake.peer_id != expected {
            return Err(Error::HandshakeMismatch(Some(handshake.peer_id)));
        }
    }

    let old_parts = framed.into_parts();
    let mut new_parts = FramedParts::new(old_parts.io, MessageCodec);
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    Ok((handshake.peer_id, Framed::from_parts(new_parts)))
}

async fn register_session(
    peer_id: PeerId,
    addr: SocketAddr,
    framed: Framed<TcpStream, MessageCodec>,
    local_id: PeerId,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) -> Result<()> {
    let (sink, stream) = framed.split();
    let session = Arc::new(Session::new(peer_id, addr, sink));
    registry.insert(peer_id, Arc::clone(&session), NeighborState::new(storage.num_pieces()));

    let bitfield = storage.decode_bitfield(&storage.encode_bitfield());
    session.send(Message::Bitfield(bitfield)).await?;

    tokio::spawn(session::run(
        local_id,
        peer_id,
        stream,
        session,
        registry,
        storage,
    ));

    Ok(())
}
