//! Relay transport
//!
//! The router only needs two things from a transport: send a complete frame
//! to a connection, and drop a connection. Connection lifecycle and inbound
//! frames reach the router as [`RelayEvent`]s on a channel, which keeps the
//! router the single owner of room state.
//!
//! [`TcpTransport`] is the bundled implementation. Each frame on the wire is
//!
//! ```text
//! +-------------------+---------+-------------+
//! | length (u32, LE)  | channel | relay frame |
//! +-------------------+---------+-------------+
//!                      1 byte    length - 1 bytes
//! ```
//!
//! Every connection has a bounded outbound queue. When it is full, unreliable
//! frames are dropped and a reliable frame closes the connection, so a client
//! that stops reading cannot grow the node's memory.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::ProtocolError;
use crate::types::{Channel, ConnectionId};

/// Something that happened on a transport connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connected(ConnectionId),
    Data {
        connection: ConnectionId,
        channel: Channel,
        frame: Bytes,
    },
    Disconnected(ConnectionId),
}

/// Outbound half of a transport as seen by the router
///
/// `send` must not retain `frame` after it returns; callers reuse the
/// buffer immediately.
pub trait Transport: Send + Sync + 'static {
    /// Queue a complete frame for delivery
    fn send(&self, connection: ConnectionId, channel: Channel, frame: &[u8]);

    /// Close a connection; a `Disconnected` event follows
    fn disconnect(&self, connection: ConnectionId);
}

/// Default depth of a connection's outbound queue
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

enum Outbound {
    Frame(Bytes),
    Close,
}

struct Peer {
    tx: mpsc::Sender<Outbound>,
    /// Stops the reader
    cancel: CancellationToken,
    /// Stops the writer without flushing what is queued
    abort: CancellationToken,
}

impl Peer {
    fn abort(&self) {
        self.abort.cancel();
        self.cancel.cancel();
    }

    /// Queue a graceful close, or abort if the queue cannot take it
    fn close(&self) {
        if self.tx.try_send(Outbound::Close).is_err() {
            self.abort.cancel();
        }
    }
}

/// Length-prefixed TCP transport
pub struct TcpTransport {
    peers: DashMap<ConnectionId, Peer>,
    next_id: AtomicU32,
    max_frame_size: usize,
    queue_depth: usize,
}

impl TcpTransport {
    /// Create a transport refusing inbound frames over `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            peers: DashMap::new(),
            next_id: AtomicU32::new(1),
            max_frame_size,
            queue_depth: OUTBOUND_QUEUE_DEPTH,
        }
    }

    /// Set how many frames may wait for one connection's socket
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Accept connections until `cancel` fires
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        events: mpsc::Sender<RelayEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        tokio::spawn(self.clone().handle_connection(
                            socket,
                            peer_addr,
                            events.clone(),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        tracing::debug!("Transport accept loop stopped");
    }

    async fn handle_connection(
        self: Arc<Self>,
        socket: TcpStream,
        peer_addr: SocketAddr,
        events: mpsc::Sender<RelayEvent>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::channel(self.queue_depth);
        let abort = CancellationToken::new();
        self.peers.insert(
            id,
            Peer {
                tx,
                cancel: cancel.clone(),
                abort: abort.clone(),
            },
        );

        tracing::debug!(connection_id = %id, peer = %peer_addr, "New connection");

        if events.send(RelayEvent::Connected(id)).await.is_err() {
            self.peers.remove(&id);
            return;
        }

        let (mut reader, mut writer) = socket.into_split();

        tokio::spawn(async move {
            loop {
                let outbound = tokio::select! {
                    biased;
                    _ = abort.cancelled() => break,
                    outbound = rx.recv() => outbound,
                };
                let bytes = match outbound {
                    Some(Outbound::Frame(bytes)) => bytes,
                    Some(Outbound::Close) | None => break,
                };
                let written = tokio::select! {
                    biased;
                    _ = abort.cancelled() => break,
                    written = writer.write_all(&bytes) => written,
                };
                if let Err(e) = written {
                    tracing::debug!(connection_id = %id, error = %e, "Write failed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let transport = self;
        tokio::spawn(async move {
            let max = transport.max_frame_size;
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = read_frame(&mut reader, max) => next,
                };

                match next {
                    Ok(Some((channel, frame))) => {
                        let event = RelayEvent::Data {
                            connection: id,
                            channel,
                            frame,
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(connection_id = %id, error = %e, "Read failed");
                        break;
                    }
                }
            }

            if let Some((_, peer)) = transport.peers.remove(&id) {
                peer.close();
            }
            let _ = events.send(RelayEvent::Disconnected(id)).await;
            tracing::debug!(connection_id = %id, "Connection closed");
        });
    }
}

impl Transport for TcpTransport {
    fn send(&self, connection: ConnectionId, channel: Channel, frame: &[u8]) {
        let Some(peer) = self.peers.get(&connection) else {
            return;
        };
        match peer.tx.try_send(Outbound::Frame(encode_frame(channel, frame))) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => match channel {
                Channel::Unreliable => {
                    tracing::trace!(connection_id = %connection, "Outbound queue full, dropping frame");
                }
                Channel::Reliable => {
                    tracing::warn!(connection_id = %connection, "Outbound queue full, disconnecting");
                    peer.abort();
                }
            },
        }
    }

    fn disconnect(&self, connection: ConnectionId) {
        if let Some(peer) = self.peers.get(&connection) {
            peer.close();
            peer.cancel.cancel();
        }
    }
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> std::io::Result<Option<(Channel, Bytes)>> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            ProtocolError::EmptyFrame,
        ));
    }
    if len > max_frame_size + 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            ProtocolError::FrameTooLarge(len),
        ));
    }

    let channel = Channel::from_u8(reader.read_u8().await?);
    let mut frame = vec![0u8; len - 1];
    reader.read_exact(&mut frame).await?;

    Ok(Some((channel, Bytes::from(frame))))
}

/// Encode one frame the way [`TcpTransport`] puts it on the wire
pub fn encode_frame(channel: Channel, frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + frame.len());
    buf.put_u32_le((frame.len() + 1) as u32);
    buf.put_u8(channel.as_u8());
    buf.put_slice(frame);
    buf.freeze()
}
