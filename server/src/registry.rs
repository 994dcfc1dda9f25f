//! Connection tracking for the game server
//!
//! This module owns every live TCP connection and handles:
//! - Connection identifiers, allocated in increasing order so that iteration
//!   order matches join order
//! - Per-connection receive buffers that reassemble frames split across reads
//! - Best-effort delivery of encoded frames to one or all connections
//! - Capacity limits
//!
//! A connection never writes to its socket directly. Frames are pushed into a
//! bounded outbox that a dedicated writer task drains, so a slow client can
//! never stall the event loop. When a client stops reading and its outbox
//! fills up, further frames for it are dropped. Dropping a [`Connection`]
//! closes the outbox and aborts its reader task, which closes the socket once
//! queued frames are out.

use bytes::Bytes;
use log::{debug, info};
use shared::{Frame, FrameBuffer};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Stable identifier of a connection for the lifetime of the server
pub type ConnectionId = u32;

/// Frames a connection may have waiting for its writer task
pub const OUTBOX_CAPACITY: usize = 256;

/// Sending side of a connection's outbox
pub type Outbox = mpsc::Sender<Bytes>;

/// Creates the outbox channel for a new connection
pub fn outbox() -> (Outbox, mpsc::Receiver<Bytes>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

/// A connected client
///
/// Holds the receive buffer and the outbox feeding the writer task. The
/// player state lives in the session under the same [`ConnectionId`].
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned by the registry
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// Bytes received but not yet consumed as frames
    buffer: FrameBuffer,
    outbox: Outbox,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, outbox: Outbox) -> Self {
        Self {
            id,
            addr,
            buffer: FrameBuffer::new(),
            outbox,
            reader: None,
        }
    }

    /// Queues a frame for delivery
    ///
    /// Returns false if the frame was dropped because the outbox is full or
    /// the writer task is gone. The connection stays registered either way;
    /// only the read side deregisters connections.
    pub fn send(&self, frame: Bytes) -> bool {
        match self.outbox.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Connection {} outbox is full, frame dropped", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} writer is closed, frame dropped", self.id);
                false
            }
        }
    }

    /// Buffers received bytes and returns every frame now complete
    pub fn receive(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend(data);
        self.buffer.drain_frames()
    }

    /// Bytes of an incomplete frame still waiting for the rest
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Ties the reader task's lifetime to this connection
    pub fn attach_reader(&mut self, reader: JoinHandle<()>) {
        self.reader = Some(reader);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// All live connections, in join order
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    /// Next identifier to hand out
    next_connection_id: ConnectionId,
    /// Maximum number of concurrent connections
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Creates an empty registry
    ///
    /// Connection ids start at 1 and are never reused.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Registers a new connection
    ///
    /// Returns None when the registry is full; the caller should drop the
    /// outbox, which closes the socket.
    pub fn register(&mut self, addr: SocketAddr, outbox: Outbox) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} opened from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr, outbox));
        Some(id)
    }

    /// Removes and closes a connection
    ///
    /// Returns false if it was already gone.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(connection) => {
                info!("Connection {} from {} closed", id, connection.addr);
                if connection.pending_bytes() > 0 {
                    debug!(
                        "Discarded {} bytes of an incomplete frame from connection {}",
                        connection.pending_bytes(),
                        id
                    );
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Buffers bytes for a connection and returns its complete frames
    ///
    /// Returns None for an unknown connection.
    pub fn receive(&mut self, id: ConnectionId, data: &[u8]) -> Option<Vec<Frame>> {
        self.connections
            .get_mut(&id)
            .map(|connection| connection.receive(data))
    }

    /// Queues a frame for a single connection
    pub fn send_to(&self, id: ConnectionId, frame: Bytes) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|connection| connection.send(frame))
    }

    /// Queues a frame for every connection, returning how many accepted it
    ///
    /// A failed connection does not stop delivery to the others.
    pub fn broadcast(&self, frame: &Bytes) -> usize {
        self.connections
            .values()
            .filter(|connection| connection.send(frame.clone()))
            .count()
    }

    /// Connection ids in join order
    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
