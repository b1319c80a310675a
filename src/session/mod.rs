//! A neighbor session: the owned transport half plus the bookkeeping needed
//! to serialize sends onto it (§4.3).
//!
//! The mutable protocol flags and the neighbor's bitmap live in
//! [`crate::registry::NeighborState`], reached through the shared registry;
//! a [`Session`] only owns what every subsystem needs in order to *send* to
//! this neighbor, since unlike `am_choking`/`peer_choking` the transport
//! itself is never read or mutated under the registry lock.

mod process;

pub(crate) use process::run;

use std::net::SocketAddr;

use futures::{stream::SplitSink, SinkExt};
use tokio::{net::TcpStream, sync::Mutex as AsyncMutex};
use tokio_util::codec::Framed;

use crate::{error::Result, wire::Message, PeerId};

type MessageSink = SplitSink<Framed<TcpStream, crate::wire::MessageCodec>, Message>;

/// One connected neighbor's transport, shared by every task that may need to
/// send it a message (its own message processor, the scheduler issuing
/// choke/unchoke, another session's processor broadcasting HAVE).
pub struct Session {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    sink: AsyncMutex<Option<MessageSink>>,
}

impl Session {
    pub(crate) fn new(peer_id: PeerId, addr: SocketAddr, sink: MessageSink) -> Self {
        Self {
            peer_id,
            addr,
            sink: AsyncMutex::new(Some(sink)),
        }
    }

    /// A session with no transport, for exercising registry bookkeeping in
    /// tests without opening a socket.
    #[cfg(test)]
    pub(crate) fn for_test(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            addr: "0.0.0.0:0".parse().unwrap(),
            sink: AsyncMutex::new(None),
        }
    }

    /// Frames and sends `msg`, serialized against any other concurrent
    /// sender on this same session (§4.3, §5): frames from different calls
    /// are never interleaved on the wire.
    pub async fn send(&self, msg: Message) -> Result<()> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(msg).await,
            None => Ok(()),
        }
    }

    /// Closes the transport; further sends are silently dropped. Called once
    /// this session's message processor exits, and by the terminator on
    /// shutdown (§4.7).
    pub async fn close(&self) {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.close().await;
        }
    }
}
