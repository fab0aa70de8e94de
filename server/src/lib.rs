//! # Tron Arena Server Library
//!
//! Authoritative server for a light-cycle arena match. Up to four players
//! connect over TCP, complete a key exchange, and steer their cycles with
//! encrypted commands while the server simulates the field at a fixed tick
//! rate and streams snapshots back to everyone.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server alone moves players, grows trails, and decides collisions.
//! Clients only send direction changes and jumps; whatever they render comes
//! from the server's snapshots.
//!
//! ### Connection Handling
//! Every socket gets its own worker task which:
//! - announces the server's public key parameters
//! - registers the client's key material
//! - splits the byte stream into line frames and decrypts them
//! - forwards decoded commands to the engine
//! - encrypts and writes every engine event back to the peer
//!
//! ### Match Lifecycle
//! A match forms while players join, starts once the lobby is full, pauses
//! briefly on the start snapshot, then ticks until at most one player is
//! left alive.
//!
//! ## Architecture Design
//!
//! ### Single Writer
//! Only the engine task touches the game state. Workers queue commands which
//! the engine drains at the start of each tick, so a tick always sees a
//! consistent roster.
//!
//! ### Non-Blocking Fan-Out
//! Engine events go to each worker through its own unbounded queue. A slow
//! or stalled client never delays the tick loop or the other players.
//!
//! ## Module Organization
//!
//! ### Geometry Module (`geometry`)
//! Integer outlines of player heads and trail segments, and the exact and
//! coarse intersection tests run on them.
//!
//! ### Session Module (`session`)
//! Per-player state: head, direction, trail, and jump countdown.
//!
//! ### Game Module (`game`)
//! Registration, command application, the tick algorithm, and winner
//! resolution on a plain `GameState`.
//!
//! ### Engine Module (`engine`)
//! Runs a `GameState` on its own task and publishes snapshots, deaths, and
//! the match result.
//!
//! ### Connection Module (`connection`)
//! The per-socket worker and its frame reader.
//!
//! ### Client Manager Module (`client_manager`)
//! Seat and id bookkeeping for the front door.
//!
//! ### Network Module (`network`)
//! TCP accept loop, lobby, and match auto-start.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{BoxError, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let config = ServerConfig {
//!         addr: "127.0.0.1:8080".to_string(),
//!         players_per_match: 2,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Accepts two players, runs the match, and returns the winner
//!     let server = Server::bind(config).await?;
//!     let winner = server.run().await?;
//!     println!("Winner: {:?}", winner);
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod connection;
pub mod engine;
pub mod game;
pub mod geometry;
pub mod network;
pub mod session;
