//! # Jetpack Race Server Library
//!
//! This library provides the authoritative server for a two-dimensional,
//! side-scrolling jetpack race. Players fly through a tile map collecting coins
//! and avoiding electric hazards; the server owns every player's position and
//! score and streams the results to all connected clients over TCP.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every player scrolls forward one column per tick while gravity or the
//! jetpack changes their vertical velocity. Clients only ever report whether
//! their jetpack is on; positions, scores, collisions and winners are decided
//! here.
//!
//! ### Round Lifecycle
//! A round starts as soon as two players are connected. It ends when a player
//! reaches the right edge of the map, when a player hits a hazard (the other
//! player wins), or when every opponent disconnects. Connections that arrive
//! during a round receive the map and are then closed.
//!
//! ### State Broadcasting
//! After every tick the server broadcasts any coin or hazard collisions, then
//! the state of every player, then the end of the round if there was one.
//! All clients receive the same frames in the same order.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! The server runs on a current-thread tokio runtime. One event loop owns the
//! session and the connection registry outright, so no locks are needed. Each
//! pass waits for network activity with a bounded timeout, applies accepts,
//! received data and disconnections in that order, then advances the game by
//! one step. The tick rate is therefore tied to the poll timeout and to client
//! traffic rather than to a fixed clock.
//!
//! ### TCP Framing
//! Every message is a frame with a one byte type tag and a three byte length.
//! Each connection keeps a receive buffer, so frames split across reads or
//! packed into one read are both handled.
//!
//! ### Connection Tasks
//! Each connection gets a reader task forwarding bytes to the loop and a
//! writer task draining a bounded outbox. Sending never blocks the loop: a
//! frame for a client whose outbox is full is dropped, and a failed write
//! stops only that connection's writer.
//!
//! ## Module Organization
//!
//! ### Player Module (`player`)
//! A single player's position, velocity, score and jetpack state, and the
//! physics step applied to it every tick.
//!
//! ### Game Module (`game`)
//! The session state machine (waiting, started, ended), player numbering,
//! collision detection and win rules.
//!
//! ### Registry Module (`registry`)
//! Live connections keyed by connection id:
//! - Connection id assignment in join order
//! - Per-connection frame reassembly
//! - Best-effort sends and broadcasts
//! - Capacity limits
//!
//! ### Network Module (`network`)
//! The listener, per-connection tasks and the event loop tying everything
//! together.
//!
//! ### Config and Error Modules (`config`, `error`)
//! Command line parsing and the errors that stop the server from starting.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use std::path::PathBuf;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 4242,
//!         map_path: PathBuf::from("maps/level1.txt"),
//!         ..ServerConfig::default()
//!     };
//!
//!     let map = config.load_map()?;
//!     let server = Server::new(config, map)?;
//!     let listener = server.bind().await?;
//!
//!     // Runs until the process exits
//!     server.run(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod player;
pub mod registry;
