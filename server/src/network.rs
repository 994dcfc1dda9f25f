//! Server network layer: TCP connection tasks and the event loop driving the game

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::game::{RoundResult, Session, SessionPhase};
use crate::registry::{self, ConnectionId, ConnectionRegistry, Outbox};
use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use shared::{ClientMessage, Frame, LevelMap, ServerMessage};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Bytes requested from a socket per read
const READ_BUFFER_SIZE: usize = 4096;

/// Events sent from network tasks to the event loop
#[derive(Debug)]
pub enum NetworkEvent {
    Accepted {
        stream: TcpStream,
        addr: SocketAddr,
    },
    Received {
        connection_id: ConnectionId,
        data: Bytes,
    },
    /// The peer closed its side of the connection
    Closed { connection_id: ConnectionId },
    ReadFailed {
        connection_id: ConnectionId,
        error: io::Error,
    },
}

/// Authoritative game server
///
/// Owns the session and every connection. All game state is touched only
/// from [`Server::run`], one pass at a time; socket I/O happens in separate
/// tasks that talk to the loop through channels.
pub struct Server {
    config: ServerConfig,
    registry: ConnectionRegistry,
    session: Session,
    /// MapData frame sent to every new connection, encoded once
    map_frame: Bytes,

    server_tx: mpsc::UnboundedSender<NetworkEvent>,
    server_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Server {
    pub fn new(config: ServerConfig, map: LevelMap) -> Result<Self, ServerError> {
        let map_frame = ServerMessage::MapData(map.clone()).encode()?;
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        info!(
            "Loaded {}x{} map, up to {} players",
            map.width(),
            map.height(),
            config.max_players
        );

        Ok(Server {
            registry: ConnectionRegistry::new(config.max_players),
            session: Session::new(map),
            map_frame,
            config,
            server_tx,
            server_rx,
        })
    }

    /// Binds the listening socket for the configured address
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!("Server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Runs the event loop
    ///
    /// Each pass waits up to the poll timeout for network activity, takes
    /// every event that is ready, applies accepts, then received data, then
    /// disconnections, and finally advances the game by one step. The
    /// simulation therefore ticks once per pass: at least every poll timeout,
    /// and more often while clients are sending.
    pub async fn run(mut self, listener: TcpListener) -> Result<(), ServerError> {
        self.spawn_acceptor(listener);
        info!(
            "Event loop started, poll timeout {:?}",
            self.config.poll_timeout
        );

        loop {
            let mut events = Vec::new();
            match timeout(self.config.poll_timeout, self.server_rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break,
                Err(_) => {}
            }
            while let Ok(event) = self.server_rx.try_recv() {
                events.push(event);
            }

            self.process_events(events);
            self.update();
        }

        Ok(())
    }

    /// Spawns the task accepting new TCP connections
    fn spawn_acceptor(&self, listener: TcpListener) {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to disable Nagle for {}: {}", addr, e);
                        }
                        if server_tx
                            .send(NetworkEvent::Accepted { stream, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Applies one pass worth of events in loop order
    fn process_events(&mut self, events: Vec<NetworkEvent>) {
        let mut accepted = Vec::new();
        let mut received = Vec::new();
        let mut closed = Vec::new();

        for event in events {
            match event {
                NetworkEvent::Accepted { stream, addr } => accepted.push((stream, addr)),
                NetworkEvent::Received {
                    connection_id,
                    data,
                } => received.push((connection_id, data)),
                NetworkEvent::Closed { connection_id } => {
                    debug!("Connection {} closed by peer", connection_id);
                    closed.push(connection_id);
                }
                NetworkEvent::ReadFailed {
                    connection_id,
                    error,
                } => {
                    warn!("Read from connection {} failed: {}", connection_id, error);
                    closed.push(connection_id);
                }
            }
        }

        for (stream, addr) in accepted {
            self.register_stream(stream, addr);
        }
        for (connection_id, data) in received {
            self.receive(connection_id, &data);
        }
        for connection_id in closed {
            self.remove_client(connection_id);
        }
    }

    /// Splits a new socket into its reader and writer tasks and accepts it
    fn register_stream(&mut self, stream: TcpStream, addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let (outbox_tx, outbox_rx) = registry::outbox();
        tokio::spawn(write_loop(addr, write_half, outbox_rx));

        if let Some(id) = self.accept(addr, outbox_tx) {
            let reader = tokio::spawn(read_loop(id, read_half, self.server_tx.clone()));
            if let Some(connection) = self.registry.get_mut(id) {
                connection.attach_reader(reader);
            }
        }
    }

    /// Admits a new connection and sends it the map
    ///
    /// Returns the connection id if the connection joined the game. A full
    /// server closes the connection straight away; during a round the
    /// connection only receives MapData before being closed.
    pub fn accept(&mut self, addr: SocketAddr, outbox: Outbox) -> Option<ConnectionId> {
        let Some(id) = self.registry.register(addr, outbox) else {
            warn!(
                "Server full ({} players), rejecting {}",
                self.registry.len(),
                addr
            );
            return None;
        };

        self.send_frame(id, self.map_frame.clone());

        if self.session.phase() == SessionPhase::Started {
            info!("Round in progress, closing late connection {}", id);
            self.registry.remove(id);
            return None;
        }

        self.session.add_player(id);
        Some(id)
    }

    /// Buffers bytes read from a connection and dispatches complete frames
    pub fn receive(&mut self, id: ConnectionId, data: &[u8]) {
        if self.config.debug {
            debug!("<- {} [{}]", id, hex_dump(data));
        }

        match self.registry.receive(id, data) {
            Some(frames) => {
                for frame in frames {
                    self.dispatch(id, frame);
                }
            }
            None => debug!("Dropping data for unknown connection {}", id),
        }
    }

    /// Routes one client frame
    pub fn dispatch(&mut self, id: ConnectionId, frame: Frame) {
        match ClientMessage::decode(&frame) {
            Ok(ClientMessage::Connect) => debug!("Connection {} said hello", id),
            Ok(ClientMessage::PlayerInput { jetpack }) => {
                if !self.session.set_jetpack(id, jetpack) {
                    warn!("Input from connection {} which has no player", id);
                }
            }
            Err(e) => warn!("Ignoring frame from connection {}: {}", id, e),
        }
    }

    /// Closes a connection and applies the disconnection rules
    pub fn remove_client(&mut self, id: ConnectionId) {
        if !self.registry.remove(id) {
            return;
        }

        if let Some(result) = self.session.remove_player(id) {
            self.announce_end(result);
        }
    }

    /// Advances the game by one step
    ///
    /// Runs a simulation tick while a round is in progress, otherwise starts
    /// a round once enough players are connected.
    pub fn update(&mut self) {
        // A round that ends is finished before this returns, so the session
        // is never observed in the Ended phase here
        if self.session.phase() == SessionPhase::Started {
            let report = self.session.tick();
            for collision in report.collisions {
                self.broadcast(ServerMessage::Collision(collision));
            }
            self.broadcast(ServerMessage::GameState(report.state));
            if let Some(result) = report.result {
                self.announce_end(result);
            }
        } else if self.session.try_start() {
            self.broadcast(ServerMessage::GameStart);
        }
    }

    fn announce_end(&mut self, result: RoundResult) {
        self.broadcast(ServerMessage::GameEnd {
            winner: result.winner,
        });
        self.session.finish();
    }

    fn broadcast(&self, message: ServerMessage) {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {:?}: {}", message.message_type(), e);
                return;
            }
        };

        if self.config.debug {
            debug!("-> * [{}]", hex_dump(&frame));
        }
        self.registry.broadcast(&frame);
    }

    fn send_frame(&self, id: ConnectionId, frame: Bytes) {
        if self.config.debug {
            debug!("-> {} [{}]", id, hex_dump(&frame));
        }
        self.registry.send_to(id, frame);
    }
}

/// Forwards everything read from a connection to the event loop
///
/// Stops after end of stream or the first read error, each reported as a
/// single final event.
pub async fn read_loop<R>(
    connection_id: ConnectionId,
    mut reader: R,
    events: mpsc::UnboundedSender<NetworkEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        buffer.reserve(READ_BUFFER_SIZE);
        let (event, last) = match reader.read_buf(&mut buffer).await {
            Ok(0) => (NetworkEvent::Closed { connection_id }, true),
            Ok(_) => (
                NetworkEvent::Received {
                    connection_id,
                    data: buffer.split().freeze(),
                },
                false,
            ),
            Err(error) => (
                NetworkEvent::ReadFailed {
                    connection_id,
                    error,
                },
                true,
            ),
        };

        if events.send(event).is_err() || last {
            break;
        }
    }
}

/// Writes queued frames to a connection until its outbox is closed
///
/// A write error stops the task and leaves the connection registered;
/// frames queued afterwards are dropped. Once the outbox closes, the write
/// side is shut down after everything queued has been written.
pub async fn write_loop<W>(
    peer: SocketAddr,
    mut writer: W,
    mut outbox: mpsc::Receiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!("Write to {} failed: {}", peer, e);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of {} failed: {}", peer, e);
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
